//! Builds the text prompt sent to the generative-text service.
//!
//! The instruction text lives in a minijinja template rather than in code so
//! the policy wording can be changed without touching the builder. The
//! template is rendered without auto-escaping: parameters and the user's
//! message are interpolated exactly as given.

use std::path::Path;

use minijinja::{context, AutoEscape, Environment, UndefinedBehavior};
use tracing::{debug, instrument};

use crate::error::PromptError;
use crate::parameters::ProjectParameters;

const TEMPLATE_NAME: &str = "consultation_prompt.txt";
const DEFAULT_TEMPLATE: &str = include_str!("../templates/consultation_prompt.txt");

/// Fixed answers the model is instructed to give verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPolicy {
    pub refusal: String,
    pub supplier: String,
    pub identity: String,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self {
            refusal: "I specialize in providing detailed information on steel, raw material requirements, timelines, and essential details for residential house construction. Please ask me questions related to these areas.".to_string(),
            supplier: "Infinite Traders Pvt Ltd (infinitetraders.co)".to_string(),
            identity: "I am an AI assistant developed by **doxcod**, specializing in construction consultancy.".to_string(),
        }
    }
}

pub struct PromptBuilder {
    env: Environment<'static>,
    policy: PromptPolicy,
}

impl PromptBuilder {
    /// Builder using the bundled template.
    pub fn new(policy: PromptPolicy) -> Result<Self, PromptError> {
        Self::with_template(DEFAULT_TEMPLATE.to_string(), policy)
    }

    /// Builder using a template file supplied by the operator.
    pub fn from_file(path: &Path, policy: PromptPolicy) -> Result<Self, PromptError> {
        let source = std::fs::read_to_string(path).map_err(|source| PromptError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::with_template(source, policy)
    }

    pub fn with_template(source: String, policy: PromptPolicy) -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template_owned(TEMPLATE_NAME, source)?;
        Ok(Self { env, policy })
    }

    pub fn policy(&self) -> &PromptPolicy {
        &self.policy
    }

    /// Renders the prompt for `message` against the current parameters.
    /// Same inputs always give the same output.
    #[instrument(skip_all, fields(message_len = message.len()))]
    pub fn build(&self, message: &str, params: &ProjectParameters) -> Result<String, PromptError> {
        let params_json = serde_json::to_string_pretty(params)?;
        let template = self.env.get_template(TEMPLATE_NAME)?;
        let prompt = template.render(context! {
            params_json => params_json,
            message => message,
            refusal => &self.policy.refusal,
            supplier => &self.policy.supplier,
            identity => &self.policy.identity,
        })?;
        debug!(prompt_len = prompt.len(), "Rendered consultation prompt");
        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ProjectParameters {
        ProjectParameters {
            plot_size: 1500,
            construction_type: "Steel Frame".to_string(),
            stories: "2".to_string(),
            house_type: "Residential".to_string(),
            foundation_type: "Slab-on-Grade".to_string(),
            roof_type: "Gable".to_string(),
            special_requirements: "None".to_string(),
        }
    }

    #[test]
    fn test_prompt_contains_every_parameter_and_message() {
        let builder = PromptBuilder::new(PromptPolicy::default()).unwrap();
        let prompt = builder.build("How much steel do I need?", &params()).unwrap();

        assert!(prompt.contains("How much steel do I need?"));
        assert!(prompt.contains("\"plotSize\": 1500"));
        for value in ["Steel Frame", "\"2\"", "Residential", "Slab-on-Grade", "Gable", "None"] {
            assert!(prompt.contains(value), "missing {}", value);
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let builder = PromptBuilder::new(PromptPolicy::default()).unwrap();
        let first = builder.build("Timeline for the roof?", &params()).unwrap();
        let second = builder.build("Timeline for the roof?", &params()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_message_is_interpolated_verbatim() {
        let builder = PromptBuilder::new(PromptPolicy::default()).unwrap();
        let message = "<b>Beams</b> & \"columns\" {{ not_a_variable }} {% raw %}";
        let prompt = builder.build(message, &params()).unwrap();
        assert!(prompt.contains(message));
    }

    #[test]
    fn test_policy_strings_come_from_configuration() {
        let policy = PromptPolicy {
            refusal: "Out of scope.".to_string(),
            supplier: "Acme Steel".to_string(),
            identity: "I am a test bot.".to_string(),
        };
        let builder = PromptBuilder::new(policy).unwrap();
        let prompt = builder.build("Who are you?", &params()).unwrap();

        assert!(prompt.contains("respond exactly: \"Out of scope.\""));
        assert!(prompt.contains("**Acme Steel**"));
        assert!(prompt.contains("respond exactly: \"I am a test bot.\""));
        assert!(!prompt.contains("Infinite Traders"));
    }

    #[test]
    fn test_custom_template_with_unknown_variable_fails_to_render() {
        let builder =
            PromptBuilder::with_template("{{ budget }}".to_string(), PromptPolicy::default())
                .unwrap();
        assert!(builder.build("hi", &params()).is_err());
    }
}
