//! State of one consultation: parameters, transcript, and the two small
//! state machines the front ends drive (pending request and parameter edit).
//!
//! Everything here is synchronous. The caller releases the session before
//! awaiting the network and comes back with [`ConsultationSession::finish_exchange`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SessionError;
use crate::parameters::{ParamField, ParameterStore, ProjectParameters, ValidatedForm};
use crate::prompt::PromptBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Sender,
    /// Plain text for the user, HTML for the assistant.
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only transcript.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, sender: Sender, content: String) -> ChatMessage {
        let message = ChatMessage {
            sender,
            content,
            timestamp: Utc::now(),
        };
        self.messages.push(message.clone());
        message
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestState {
    Idle,
    AwaitingResponse,
}

/// The parameter currently open in the edit dialog and its unsaved value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSession {
    pub field: ParamField,
    pub pending_value: String,
}

/// Work handed back by [`ConsultationSession::begin_exchange`].
#[derive(Debug, Clone)]
pub struct PendingExchange {
    pub prompt: String,
    pub user_message: ChatMessage,
}

/// Snapshot sent to front ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub parameters: ProjectParameters,
    pub messages: Vec<ChatMessage>,
    pub is_typing: bool,
    pub editing: Option<EditSession>,
}

/// Change notifications broadcast to subscribers of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    MessageAppended { session_id: Uuid, message: ChatMessage },
    #[serde(rename_all = "camelCase")]
    TypingChanged { session_id: Uuid, is_typing: bool },
    #[serde(rename_all = "camelCase")]
    ParametersChanged {
        session_id: Uuid,
        parameters: ProjectParameters,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            SessionEvent::MessageAppended { session_id, .. }
            | SessionEvent::TypingChanged { session_id, .. }
            | SessionEvent::ParametersChanged { session_id, .. } => *session_id,
        }
    }
}

#[derive(Debug)]
pub struct ConsultationSession {
    id: Uuid,
    store: ParameterStore,
    log: ConversationLog,
    state: RequestState,
    edit: Option<EditSession>,
    first_query: String,
    first_query_sent: bool,
    last_active: Instant,
}

impl ConsultationSession {
    pub fn new(id: Uuid, form: ValidatedForm) -> Self {
        Self {
            id,
            store: ParameterStore::new(form.params),
            log: ConversationLog::new(),
            state: RequestState::Idle,
            edit: None,
            first_query: form.first_query,
            first_query_sent: false,
            last_active: Instant::now(),
        }
    }

    /// Marks the session as used just now.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn params(&self) -> &ProjectParameters {
        self.store.params()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_typing(&self) -> bool {
        self.state == RequestState::AwaitingResponse
    }

    pub fn editing(&self) -> Option<&EditSession> {
        self.edit.as_ref()
    }

    /// Seeds the transcript with previously stored messages. Only applies to
    /// a fresh session. A restored conversation already contains the first
    /// question, so it is not handed out again.
    pub fn restore_history(&mut self, history: Vec<ChatMessage>) {
        if self.log.is_empty() && !history.is_empty() {
            self.log.messages = history;
            self.first_query_sent = true;
        }
    }

    /// The form's first question, handed out once per session.
    pub fn take_first_query(&mut self) -> Option<String> {
        if self.first_query_sent {
            return None;
        }
        self.first_query_sent = true;
        Some(self.first_query.clone())
    }

    /// Records the user's message and moves to awaiting-response. Rejected
    /// without any change while a response is pending or when the message is
    /// blank.
    pub fn begin_exchange(
        &mut self,
        message: &str,
        builder: &PromptBuilder,
    ) -> Result<PendingExchange, SessionError> {
        if self.is_typing() {
            return Err(SessionError::Busy);
        }
        let message = message.trim();
        if message.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let prompt = builder.build(message, self.store.params())?;
        let user_message = self.log.append(Sender::User, message.to_string());
        self.state = RequestState::AwaitingResponse;
        Ok(PendingExchange {
            prompt,
            user_message,
        })
    }

    /// Appends the assistant's reply and returns to idle.
    pub fn finish_exchange(&mut self, reply: String) -> ChatMessage {
        let message = self.log.append(Sender::Assistant, reply);
        self.state = RequestState::Idle;
        message
    }

    /// Applies a single-field edit. Returns the change notification appended
    /// to the transcript, or `None` when the value was blank or unchanged.
    pub fn update_parameter(
        &mut self,
        field: ParamField,
        value: &str,
    ) -> Result<Option<ChatMessage>, SessionError> {
        let change = self.store.update(field, value)?;
        Ok(change.map(|change| self.log.append(Sender::Assistant, change.notification())))
    }

    /// Opens the edit dialog for `field`, replacing any dialog already open.
    pub fn open_edit(&mut self, field: ParamField) -> &EditSession {
        let current = self.store.get(field);
        let pending_value = if field == ParamField::SpecialRequirements
            && current == crate::constants::NO_SPECIAL_REQUIREMENTS
        {
            String::new()
        } else {
            current
        };
        self.edit.insert(EditSession {
            field,
            pending_value,
        })
    }

    pub fn set_edit_value(&mut self, value: String) -> Result<(), SessionError> {
        let edit = self.edit.as_mut().ok_or(SessionError::NoEditOpen)?;
        edit.pending_value = value;
        Ok(())
    }

    /// Writes the pending value through the parameter store and closes the
    /// dialog. An invalid value leaves the dialog open.
    pub fn save_edit(&mut self) -> Result<Option<ChatMessage>, SessionError> {
        let edit = self.edit.take().ok_or(SessionError::NoEditOpen)?;
        match self.update_parameter(edit.field, &edit.pending_value) {
            Ok(message) => Ok(message),
            Err(err) => {
                self.edit = Some(edit);
                Err(err)
            }
        }
    }

    /// Closes the dialog without saving. Returns whether one was open.
    pub fn cancel_edit(&mut self) -> bool {
        self.edit.take().is_some()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            parameters: self.store.params().clone(),
            messages: self.log.messages().to_vec(),
            is_typing: self.is_typing(),
            editing: self.edit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ProjectForm;
    use crate::prompt::PromptPolicy;

    fn session() -> ConsultationSession {
        let form = ProjectForm {
            plot_size: Some("1500".to_string()),
            construction_type: Some("Steel Frame".to_string()),
            stories: Some("2".to_string()),
            house_type: Some("Residential".to_string()),
            foundation_type: Some("Slab-on-Grade".to_string()),
            roof_type: Some("Gable".to_string()),
            special_requirements: None,
            first_query: Some("How much steel do I need?".to_string()),
        };
        ConsultationSession::new(Uuid::new_v4(), form.validate().unwrap())
    }

    fn builder() -> PromptBuilder {
        PromptBuilder::new(PromptPolicy::default()).unwrap()
    }

    #[test]
    fn test_new_session_is_idle_and_empty() {
        let session = session();
        assert_eq!(session.state(), RequestState::Idle);
        assert!(session.log().is_empty());
        assert!(session.editing().is_none());
    }

    #[test]
    fn test_first_query_is_handed_out_once() {
        let mut session = session();
        assert_eq!(
            session.take_first_query().as_deref(),
            Some("How much steel do I need?")
        );
        assert_eq!(session.take_first_query(), None);
    }

    #[test]
    fn test_restored_history_suppresses_first_query() {
        let mut session = session();
        session.restore_history(Vec::new());
        assert!(session.log().is_empty());

        let mut earlier = ConversationLog::new();
        earlier.append(Sender::User, "How much steel do I need?".to_string());
        earlier.append(Sender::Assistant, "<p>About 8 tonnes.</p>".to_string());
        session.restore_history(earlier.messages().to_vec());

        assert_eq!(session.log().len(), 2);
        assert_eq!(session.take_first_query(), None);
    }

    #[test]
    fn test_touch_resets_idle_time() {
        let mut session = session();
        std::thread::sleep(Duration::from_millis(20));
        assert!(session.idle_for() >= Duration::from_millis(20));
        session.touch();
        assert!(session.idle_for() < Duration::from_millis(20));
    }

    #[test]
    fn test_exchange_cycle() {
        let mut session = session();
        let pending = session
            .begin_exchange("How much steel do I need?", &builder())
            .unwrap();
        assert!(pending.prompt.contains("How much steel do I need?"));
        assert_eq!(pending.user_message.sender, Sender::User);
        assert!(session.is_typing());

        let reply = session.finish_exchange("<p>About 8 tonnes.</p>".to_string());
        assert_eq!(reply.sender, Sender::Assistant);
        assert_eq!(session.state(), RequestState::Idle);
        assert_eq!(session.log().len(), 2);
        assert_eq!(session.log().messages()[0].content, "How much steel do I need?");
    }

    #[test]
    fn test_submission_rejected_while_awaiting() {
        let mut session = session();
        let builder = builder();
        session.begin_exchange("first", &builder).unwrap();

        let err = session.begin_exchange("second", &builder).unwrap_err();
        assert_eq!(err, SessionError::Busy);
        assert_eq!(session.log().len(), 1);

        session.finish_exchange("done".to_string());
        assert!(session.begin_exchange("second", &builder).is_ok());
    }

    #[test]
    fn test_blank_message_rejected() {
        let mut session = session();
        let err = session.begin_exchange("   \n", &builder()).unwrap_err();
        assert_eq!(err, SessionError::EmptyMessage);
        assert!(session.log().is_empty());
        assert!(!session.is_typing());
    }

    #[test]
    fn test_prompt_uses_parameters_after_edit() {
        let mut session = session();
        session.update_parameter(ParamField::RoofType, "Flat").unwrap();
        let pending = session.begin_exchange("Roof steel?", &builder()).unwrap();
        assert!(pending.prompt.contains("\"roofType\": \"Flat\""));
    }

    #[test]
    fn test_edit_save_writes_through_and_announces() {
        let mut session = session();
        let edit = session.open_edit(ParamField::PlotSize);
        assert_eq!(edit.pending_value, "1500");

        session.set_edit_value("2000".to_string()).unwrap();
        let message = session.save_edit().unwrap().unwrap();

        assert!(message.content.contains("Plot Size"));
        assert!(message.content.contains("2000"));
        assert_eq!(session.params().plot_size, 2000);
        assert!(session.editing().is_none());
    }

    #[test]
    fn test_edit_cancel_discards_pending_value() {
        let mut session = session();
        session.open_edit(ParamField::Stories);
        session.set_edit_value("4".to_string()).unwrap();

        assert!(session.cancel_edit());
        assert_eq!(session.params().stories, "2");
        assert!(session.log().is_empty());
        assert!(!session.cancel_edit());
    }

    #[test]
    fn test_edit_save_unchanged_is_silent() {
        let mut session = session();
        session.open_edit(ParamField::HouseType);
        assert_eq!(session.save_edit().unwrap(), None);
        assert!(session.log().is_empty());
        assert!(session.editing().is_none());
    }

    #[test]
    fn test_edit_invalid_value_keeps_dialog_open() {
        let mut session = session();
        session.open_edit(ParamField::PlotSize);
        session.set_edit_value("-20".to_string()).unwrap();

        assert!(matches!(session.save_edit(), Err(SessionError::Validation(_))));
        assert_eq!(session.editing().map(|e| e.field), Some(ParamField::PlotSize));
        assert_eq!(session.params().plot_size, 1500);
    }

    #[test]
    fn test_special_requirements_sentinel_prefills_empty() {
        let mut session = session();
        assert_eq!(session.open_edit(ParamField::SpecialRequirements).pending_value, "");
    }

    #[test]
    fn test_edit_without_dialog_fails() {
        let mut session = session();
        assert_eq!(
            session.set_edit_value("x".to_string()),
            Err(SessionError::NoEditOpen)
        );
        assert_eq!(session.save_edit(), Err(SessionError::NoEditOpen));
    }
}
