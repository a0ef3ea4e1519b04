use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::constants;
use crate::error::ConsultError;

// Structures matching Gemini's generateContent endpoint
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Debug)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize, Debug)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: constants::TEMPERATURE,
            top_p: constants::TOP_P,
            top_k: constants::TOP_K,
        }
    }
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: String,
}

/// Connection settings for the generative-text endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub generation: GenerationConfig,
    /// Overall request timeout. `None` keeps the transport default.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: constants::GEMINI_BASE_URL.clone(),
            model: constants::GEMINI_MODEL.clone(),
            api_key: constants::GEMINI_API_KEY.clone(),
            generation: GenerationConfig::default(),
            timeout: None,
        }
    }
}

/// Sends prompts to Gemini and normalizes the answer into displayable HTML.
#[derive(Debug, Clone)]
pub struct ConsultationClient {
    http: Client,
    config: ClientConfig,
}

impl ConsultationClient {
    pub fn new(config: ClientConfig) -> Result<Self, ConsultError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// One request, no retry. Non-success statuses and bodies that are not
    /// JSON are errors; JSON without a candidate yields the fallback text.
    #[instrument(skip_all, fields(model = %self.config.model, prompt_len = prompt.len()))]
    pub async fn send(&self, prompt: &str) -> Result<String, ConsultError> {
        let request_payload = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: self.config.generation,
        };

        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request_payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Gemini API request failed");
            return Err(ConsultError::Service { status, body });
        }

        let body = response.text().await?;
        let json: serde_json::Value = serde_json::from_str(&body)?;
        let text = extract_candidate_text(json).unwrap_or_else(|| {
            warn!("Gemini response had no candidate text, using fallback");
            constants::NO_RESPONSE_TEXT.to_string()
        });

        debug!(response_len = text.len(), "Received Gemini response");
        Ok(strip_code_fences(&text).to_string())
    }

    /// Like [`send`](Self::send) but never fails: every error becomes the
    /// fixed apology shown to the user.
    pub async fn consult(&self, prompt: &str) -> String {
        match self.send(prompt).await {
            Ok(text) => text,
            Err(e) => {
                error!("Consultation request failed: {}", e);
                constants::ERROR_RESPONSE_TEXT.to_string()
            }
        }
    }
}

fn extract_candidate_text(json: serde_json::Value) -> Option<String> {
    let response: GenerateContentResponse = serde_json::from_value(json).ok()?;
    let candidate = response.candidates?.into_iter().next()?;
    candidate.content.parts.into_iter().next().map(|part| part.text)
}

/// Removes markdown code fences wrapped around the model's HTML: a leading
/// ```` ``` ```` (optionally tagged `html`, any case) and a trailing
/// ```` ``` ````. Repeats until nothing changes, so applying it twice gives
/// the same result as once. Text without outer fences is returned untouched.
pub fn strip_code_fences(text: &str) -> &str {
    let mut current = text;
    loop {
        let mut next = current.trim();
        let mut changed = false;

        if let Some(rest) = next.strip_prefix("```") {
            next = strip_html_tag(rest).trim_start();
            changed = true;
        }
        if let Some(rest) = next.strip_suffix("```") {
            next = rest.trim_end();
            changed = true;
        }

        if !changed {
            return current;
        }
        current = next;
    }
}

fn strip_html_tag(text: &str) -> &str {
    match text.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("html") => &text[4..],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_tagged_fence() {
        let raw = "```html\n<h2>Steel</h2>\n<p>8 kg/sq ft</p>\n```";
        assert_eq!(strip_code_fences(raw), "<h2>Steel</h2>\n<p>8 kg/sq ft</p>");
    }

    #[test]
    fn test_strip_untagged_and_uppercase_fences() {
        assert_eq!(strip_code_fences("```\n<p>a</p>\n```\n"), "<p>a</p>");
        assert_eq!(strip_code_fences("```HTML<p>a</p>```"), "<p>a</p>");
    }

    #[test]
    fn test_unfenced_text_is_unchanged() {
        for text in ["<p>plain</p>", "  padded\n", "", "inline ``` fence"] {
            assert_eq!(strip_code_fences(text), text);
        }
    }

    #[test]
    fn test_strip_is_idempotent() {
        let samples = [
            "```html\n<p>x</p>\n```",
            "```html```html",
            "``````",
            "```html <p>`code`</p>",
            "<p>x</p>\n```",
            " ```\n```html\n<p>nested</p>\n```\n``` ",
        ];
        for sample in samples {
            let once = strip_code_fences(sample);
            assert_eq!(strip_code_fences(once), once, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_extract_first_candidate() {
        let json = serde_json::json!({
            "candidates": [
                {"content": {"parts": [{"text": "first"}, {"text": "ignored"}]}},
                {"content": {"parts": [{"text": "second"}]}}
            ]
        });
        assert_eq!(extract_candidate_text(json).as_deref(), Some("first"));
    }

    #[test]
    fn test_extract_handles_unexpected_shapes() {
        for json in [
            serde_json::json!({}),
            serde_json::json!({"candidates": []}),
            serde_json::json!({"candidates": [{"content": {"parts": []}}]}),
            serde_json::json!({"candidates": "nope"}),
            serde_json::json!([1, 2, 3]),
        ] {
            assert!(extract_candidate_text(json).is_none());
        }
    }

    #[test]
    fn test_request_body_shape() {
        let payload = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: "prompt" }],
            }],
            generation_config: GenerationConfig::default(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "prompt");
        assert_eq!(value["generationConfig"]["topK"], 40);
        assert!(value["generationConfig"]["topP"].is_number());
        assert!(value["generationConfig"]["temperature"].is_number());
    }
}
