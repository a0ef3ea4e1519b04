use std::collections::BTreeMap;

use thiserror::Error;

/// A rejected form submission or parameter edit. Keyed by the field's wire
/// name so front ends can show the message inline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid input: {}", summary(.errors))]
pub struct ValidationError {
    pub errors: BTreeMap<String, String>,
}

fn summary(errors: &BTreeMap<String, String>) -> String {
    errors.values().cloned().collect::<Vec<_>>().join("; ")
}

impl ValidationError {
    pub fn new() -> Self {
        Self {
            errors: BTreeMap::new(),
        }
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::new();
        err.add(field, message);
        err
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

/// Failures talking to the generative-text endpoint.
#[derive(Debug, Error)]
pub enum ConsultError {
    #[error("generative API returned status {status}: {body}")]
    Service {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("request to generative API failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("generative API response was not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read prompt template {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("prompt template error: {0}")]
    Template(#[from] minijinja::Error),
    #[error("failed to serialize project parameters: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Reasons the session controller refuses an action. None of these mutate
/// the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(uuid::Uuid),
    #[error("a response is still being generated")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
    #[error("no parameter is being edited")]
    NoEditOpen,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("prompt could not be built: {0}")]
    Prompt(String),
    #[error("reply task failed: {0}")]
    TaskFailed(String),
}

impl From<PromptError> for SessionError {
    fn from(err: PromptError) -> Self {
        SessionError::Prompt(err.to_string())
    }
}
