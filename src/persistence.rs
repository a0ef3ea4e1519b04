//! Hooks for storing transcripts and parameters outside the process.
//!
//! Nothing is persisted yet. The controller calls these hooks at the points
//! where a store would need to hear about changes, and logs (then ignores)
//! any error they return so the consultation keeps working.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::parameters::ProjectParameters;
use crate::session::ChatMessage;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn save_message(&self, session_id: Uuid, message: &ChatMessage) -> Result<()>;

    async fn load_chat_history(&self, session_id: Uuid) -> Result<Vec<ChatMessage>>;

    async fn update_project_params(&self, session_id: Uuid, params: &ProjectParameters) -> Result<()>;
}

/// Store that accepts everything and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopChatStore;

#[async_trait]
impl ChatStore for NoopChatStore {
    async fn save_message(&self, session_id: Uuid, message: &ChatMessage) -> Result<()> {
        debug!(%session_id, sender = ?message.sender, "save_message (not persisted)");
        Ok(())
    }

    async fn load_chat_history(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        debug!(%session_id, "load_chat_history (not persisted)");
        Ok(Vec::new())
    }

    async fn update_project_params(&self, session_id: Uuid, params: &ProjectParameters) -> Result<()> {
        debug!(%session_id, ?params, "update_project_params (not persisted)");
        Ok(())
    }
}
