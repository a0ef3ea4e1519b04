// Defaults for settings that can be overridden from the environment or the CLI,
// plus the fixed user-visible strings of the consultation flow.

use std::env;

lazy_static::lazy_static! {
    pub static ref GEMINI_BASE_URL: String = env::var("GEMINI_BASE_URL").unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
    pub static ref GEMINI_MODEL: String = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
    pub static ref GEMINI_API_KEY: String = env::var("GEMINI_API_KEY").unwrap_or_default();
    pub static ref TEMPLATES_DIR: String = env::var("STEEL_CONSULT_TEMPLATES").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("STEEL_CONSULT_STATIC").unwrap_or_else(|_| "static".to_string());
}

pub const DEFAULT_PORT: u16 = 9900;

/// Web sessions untouched for this long are closed.
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 30 * 60;

// Generation parameters sent with every request.
pub const TEMPERATURE: f32 = 0.7;
pub const TOP_P: f32 = 0.8;
pub const TOP_K: u32 = 40;

pub const NO_RESPONSE_TEXT: &str = "Sorry, I could not generate a response.";
pub const ERROR_RESPONSE_TEXT: &str = "Sorry, there was an error generating the response.";

/// Sentinel stored when the user leaves special requirements blank.
pub const NO_SPECIAL_REQUIREMENTS: &str = "None";

pub const EVENT_CHANNEL_CAPACITY: usize = 100;
