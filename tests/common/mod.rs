#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use steel_consult::{ChatStore, ClientConfig, Consultant, ConsultationClient, NoopChatStore, ProjectForm, PromptBuilder, PromptPolicy};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const MODEL: &str = "gemini-test";
pub const API_KEY: &str = "test-key";
pub const ENDPOINT: &str = "/v1beta/models/gemini-test:generateContent";

pub fn client_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        model: MODEL.to_string(),
        api_key: API_KEY.to_string(),
        ..ClientConfig::default()
    }
}

pub fn consultant(server: &MockServer) -> Arc<Consultant> {
    consultant_with_store(server, Arc::new(NoopChatStore))
}

pub fn consultant_with_store(server: &MockServer, store: Arc<dyn ChatStore>) -> Arc<Consultant> {
    let builder = PromptBuilder::new(PromptPolicy::default()).unwrap();
    let client = ConsultationClient::new(client_config(server)).unwrap();
    Arc::new(Consultant::new(builder, client, store))
}

pub fn gemini_reply(text: &str) -> Value {
    json!({
        "candidates": [
            { "content": { "parts": [ { "text": text } ], "role": "model" } }
        ]
    })
}

pub async fn mount_reply(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(text)))
        .mount(server)
        .await;
}

pub fn scenario_form() -> ProjectForm {
    ProjectForm {
        plot_size: Some("1500".to_string()),
        construction_type: Some("Steel Frame".to_string()),
        stories: Some("2".to_string()),
        house_type: Some("Residential".to_string()),
        foundation_type: Some("Slab-on-Grade".to_string()),
        roof_type: Some("Gable".to_string()),
        special_requirements: None,
        first_query: Some("How much steel do I need?".to_string()),
    }
}

pub fn scenario_form_json() -> Value {
    json!({
        "plotSize": 1500,
        "constructionType": "Steel Frame",
        "stories": "2",
        "houseType": "Residential",
        "foundationType": "Slab-on-Grade",
        "roofType": "Gable",
        "firstQuery": "How much steel do I need?"
    })
}
