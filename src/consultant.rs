//! Owns the live consultation sessions and runs the full flow for each
//! action: state change, prompt, network call, persistence hooks and event
//! broadcast.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::constants;
use crate::error::SessionError;
use crate::llm_interaction::ConsultationClient;
use crate::parameters::{ParamField, ProjectForm};
use crate::persistence::ChatStore;
use crate::prompt::PromptBuilder;
use crate::session::{ChatMessage, ConsultationSession, EditSession, SessionEvent, SessionView};

type SharedSession = Arc<Mutex<ConsultationSession>>;

fn lock(session: &SharedSession) -> MutexGuard<'_, ConsultationSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Consultant {
    sessions: RwLock<HashMap<Uuid, SharedSession>>,
    builder: PromptBuilder,
    client: ConsultationClient,
    store: Arc<dyn ChatStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl Consultant {
    pub fn new(builder: PromptBuilder, client: ConsultationClient, store: Arc<dyn ChatStore>) -> Self {
        let (events, _) = broadcast::channel(constants::EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: RwLock::new(HashMap::new()),
            builder,
            client,
            store,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is the normal case outside the web UI.
        let _ = self.events.send(event);
    }

    // Every lookup counts as activity for idle eviction.
    fn session(&self, id: Uuid) -> Result<SharedSession, SessionError> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))?;
        lock(&session).touch();
        Ok(session)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn view(&self, id: Uuid) -> Result<SessionView, SessionError> {
        Ok(lock(&self.session(id)?).view())
    }

    /// Validates the form and opens a session. The first question is not
    /// sent yet; see [`send_first_query`](Self::send_first_query).
    #[instrument(skip_all)]
    pub async fn open_session(&self, form: &ProjectForm) -> Result<Uuid, SessionError> {
        let validated = form.validate()?;
        let id = Uuid::new_v4();
        let mut session = ConsultationSession::new(id, validated);

        match self.store.load_chat_history(id).await {
            Ok(history) => session.restore_history(history),
            Err(e) => warn!(session_id = %id, "Failed to load chat history: {:?}", e),
        }
        if let Err(e) = self.store.update_project_params(id, session.params()).await {
            warn!(session_id = %id, "Failed to store project parameters: {:?}", e);
        }

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(session)));
        info!(session_id = %id, "Consultation session opened");
        Ok(id)
    }

    /// Sends the form's first question, once per session. Returns `None` if
    /// it was already sent.
    pub async fn send_first_query(self: &Arc<Self>, id: Uuid) -> Result<Option<ChatMessage>, SessionError> {
        let query = lock(&self.session(id)?).take_first_query();
        match query {
            Some(query) => self.submit_message(id, &query).await.map(Some),
            None => Ok(None),
        }
    }

    /// Form submission; the first question is dispatched but not awaited, so
    /// the session is already awaiting its reply when this returns.
    pub async fn begin_consultation(self: &Arc<Self>, form: &ProjectForm) -> Result<Uuid, SessionError> {
        let id = self.open_session(form).await?;
        let query = lock(&self.session(id)?).take_first_query();
        if let Some(query) = query {
            // The reply task runs on its own; results arrive as events.
            drop(self.dispatch_message(id, &query)?);
        }
        Ok(id)
    }

    /// Form submission followed by the first question.
    pub async fn start_consultation(self: &Arc<Self>, form: &ProjectForm) -> Result<Uuid, SessionError> {
        let id = self.open_session(form).await?;
        self.send_first_query(id).await?;
        Ok(id)
    }

    pub fn close_session(&self, id: Uuid) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            info!(session_id = %id, "Consultation session closed");
        }
        removed
    }

    /// Closes every session idle for longer than `max_idle`. Sessions waiting
    /// on a reply are kept. Returns how many were closed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|id, session| {
            let session = lock(session);
            let keep = session.is_typing() || session.idle_for() <= max_idle;
            if !keep {
                info!(session_id = %id, idle_secs = session.idle_for().as_secs(), "Evicting idle consultation session");
            }
            keep
        });
        before - sessions.len()
    }

    /// Runs [`evict_idle`](Self::evict_idle) periodically until the returned
    /// task is aborted.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let consultant = Arc::clone(self);
        let period = (max_idle / 2).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = consultant.evict_idle(max_idle);
                if evicted > 0 {
                    debug!(evicted, remaining = consultant.session_count(), "Idle session sweep");
                }
            }
        })
    }

    /// Records the message and starts generating the reply on a separate
    /// task. The session is already awaiting a response when this returns,
    /// and the task runs to completion even if the handle is dropped.
    #[instrument(skip(self, message))]
    pub fn dispatch_message(
        self: &Arc<Self>,
        id: Uuid,
        message: &str,
    ) -> Result<JoinHandle<ChatMessage>, SessionError> {
        let session = self.session(id)?;
        let pending = lock(&session).begin_exchange(message, &self.builder)?;

        self.publish(SessionEvent::MessageAppended {
            session_id: id,
            message: pending.user_message.clone(),
        });
        self.publish(SessionEvent::TypingChanged {
            session_id: id,
            is_typing: true,
        });

        let consultant = Arc::clone(self);
        Ok(tokio::spawn(async move {
            consultant.save(id, &pending.user_message).await;
            let reply = consultant.client.consult(&pending.prompt).await;
            let assistant_message = lock(&session).finish_exchange(reply);

            consultant.publish(SessionEvent::TypingChanged {
                session_id: id,
                is_typing: false,
            });
            consultant.publish(SessionEvent::MessageAppended {
                session_id: id,
                message: assistant_message.clone(),
            });
            consultant.save(id, &assistant_message).await;
            assistant_message
        }))
    }

    /// Sends a chat message and waits for the assistant's reply.
    pub async fn submit_message(self: &Arc<Self>, id: Uuid, message: &str) -> Result<ChatMessage, SessionError> {
        let handle = self.dispatch_message(id, message)?;
        handle.await.map_err(|e| {
            error!(session_id = %id, "Reply task failed: {:?}", e);
            SessionError::TaskFailed(e.to_string())
        })
    }

    /// Direct single-field edit, bypassing the edit dialog.
    pub async fn update_parameter(
        &self,
        id: Uuid,
        field: ParamField,
        value: &str,
    ) -> Result<Option<ChatMessage>, SessionError> {
        let session = self.session(id)?;
        let message = lock(&session).update_parameter(field, value)?;
        self.after_parameter_change(id, &session, message.as_ref()).await;
        Ok(message)
    }

    pub fn open_edit(&self, id: Uuid, field: ParamField) -> Result<EditSession, SessionError> {
        Ok(lock(&self.session(id)?).open_edit(field).clone())
    }

    pub fn set_edit_value(&self, id: Uuid, value: String) -> Result<(), SessionError> {
        lock(&self.session(id)?).set_edit_value(value)
    }

    pub async fn save_edit(&self, id: Uuid) -> Result<Option<ChatMessage>, SessionError> {
        let session = self.session(id)?;
        let message = lock(&session).save_edit()?;
        self.after_parameter_change(id, &session, message.as_ref()).await;
        Ok(message)
    }

    /// Cancel, Escape and backdrop click all end up here.
    pub fn cancel_edit(&self, id: Uuid) -> Result<bool, SessionError> {
        Ok(lock(&self.session(id)?).cancel_edit())
    }

    async fn after_parameter_change(&self, id: Uuid, session: &SharedSession, message: Option<&ChatMessage>) {
        let Some(message) = message else {
            return;
        };
        let params = lock(session).params().clone();
        info!(session_id = %id, "Project parameters updated");

        self.publish(SessionEvent::ParametersChanged {
            session_id: id,
            parameters: params.clone(),
        });
        self.publish(SessionEvent::MessageAppended {
            session_id: id,
            message: message.clone(),
        });

        if let Err(e) = self.store.update_project_params(id, &params).await {
            warn!(session_id = %id, "Failed to store project parameters: {:?}", e);
        }
        self.save(id, message).await;
    }

    async fn save(&self, id: Uuid, message: &ChatMessage) {
        if let Err(e) = self.store.save_message(id, message).await {
            warn!(session_id = %id, "Failed to store chat message: {:?}", e);
        }
    }
}
