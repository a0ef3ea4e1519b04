pub mod chat;
pub mod constants;
pub mod consultant;
pub mod error;
pub mod llm_interaction;
pub mod parameters;
pub mod persistence;
pub mod prompt;
pub mod session;
pub mod web_server;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

pub use consultant::Consultant;
pub use error::{ConsultError, PromptError, SessionError, ValidationError};
pub use llm_interaction::{strip_code_fences, ClientConfig, ConsultationClient, GenerationConfig};
pub use parameters::{ParamField, ParameterStore, ProjectForm, ProjectParameters};
pub use persistence::{ChatStore, NoopChatStore};
pub use prompt::{PromptBuilder, PromptPolicy};
pub use session::{ChatMessage, ConversationLog, Sender, SessionEvent, SessionView};

/// Prompt builder from the bundled template, or from `template` when given.
pub fn load_prompt_builder(template: Option<&Path>) -> Result<PromptBuilder> {
    let builder = match template {
        Some(path) => PromptBuilder::from_file(path, PromptPolicy::default())
            .with_context(|| format!("Failed to load prompt template {}", path.display()))?,
        None => PromptBuilder::new(PromptPolicy::default()).context("Failed to load bundled prompt template")?,
    };
    Ok(builder)
}

/// Wires the prompt builder, Gemini client and (no-op) store into a shared
/// controller.
pub fn build_consultant(config: ClientConfig, template: Option<&Path>) -> Result<Arc<Consultant>> {
    let builder = load_prompt_builder(template)?;
    let client = ConsultationClient::new(config).context("Failed to build HTTP client")?;
    Ok(Arc::new(Consultant::new(builder, client, Arc::new(NoopChatStore))))
}
