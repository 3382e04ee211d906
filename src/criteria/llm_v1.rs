//! LLM-based criteria extractor (`llm_v1`).
//!
//! Sends the eligibility text to a chat-completion endpoint in strict JSON
//! mode and validates every returned rule. There is no partial acceptance:
//! a single bad rule, a malformed body or a transport failure turns the
//! whole call into an `LlmParseError`, which the gate converts to a
//! rule_v1 fallback.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::prompt::build_payload;
use super::validation::validate_rules;
use crate::adapters::{CompletionTransport, LlmUsage, OpenAiClient, TransportError};
use crate::config::LlmSettings;
use crate::domain::CriteriaRule;

/// Parser version tag recorded in provenance metadata
pub const PARSER_VERSION: &str = "llm_v1";

/// Why an llm_v1 call produced no usable rules
#[derive(Debug, Error)]
pub enum LlmParseError {
    #[error("LLM parser is disabled")]
    Disabled,

    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("JSON parsing error: {0}")]
    Json(String),

    #[error("Rule {index} violates schema: {reason}")]
    Schema { index: usize, reason: String },

    #[error("Rule {index} ({rule_id}) cites evidence not found in the criteria text")]
    Hallucination { index: usize, rule_id: String },
}

/// Successful llm_v1 output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmExtraction {
    pub rules: Vec<CriteriaRule>,
    pub usage: Option<LlmUsage>,
}

#[derive(Deserialize)]
struct CompletionBody {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

/// LLM criteria parser
pub struct LlmCriteriaParser {
    settings: LlmSettings,
    transport: Option<Arc<dyn CompletionTransport>>,
}

impl LlmCriteriaParser {
    /// Parser that builds an `OpenAiClient` from the settings on each call
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            settings,
            transport: None,
        }
    }

    /// Parser with an injected transport
    pub fn with_transport(settings: LlmSettings, transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            settings,
            transport: Some(transport),
        }
    }

    /// Extract rules from eligibility text
    pub fn parse(&self, text: &str) -> Result<LlmExtraction, LlmParseError> {
        if !self.settings.enabled {
            return Err(LlmParseError::Disabled);
        }
        let api_key = self
            .settings
            .api_key()
            .ok_or(LlmParseError::MissingApiKey)?;

        if text.trim().is_empty() {
            return Ok(LlmExtraction::default());
        }

        let payload = build_payload(
            &self.settings.model,
            self.settings.max_output_tokens,
            text,
        );

        let body = match &self.transport {
            Some(transport) => {
                debug!(transport = transport.name(), "Using injected completion transport");
                transport.post_completion(&payload)?
            }
            None => OpenAiClient::new(
                &self.settings.endpoint,
                api_key,
                self.settings.timeout_seconds,
            )?
            .post_completion(&payload)?,
        };

        let (content, usage) = parse_completion_body(&body)?;
        let root = parse_rules_json(&content)?;
        let rules = validate_rules(&root, text)?;

        info!(
            rules = rules.len(),
            total_tokens = usage.map(|u| u.total_tokens).unwrap_or(0),
            "LLM criteria parse succeeded"
        );

        Ok(LlmExtraction { rules, usage })
    }
}

/// Pull the assistant message content and token usage out of the body
fn parse_completion_body(body: &str) -> Result<(String, Option<LlmUsage>), LlmParseError> {
    let parsed: CompletionBody = serde_json::from_str(body)
        .map_err(|e| LlmParseError::MalformedResponse(e.to_string()))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LlmParseError::MalformedResponse("no message content".into()))?;

    Ok((content, parsed.usage))
}

/// Parse message content as JSON, tolerating a Markdown fence around it
fn parse_rules_json(content: &str) -> Result<serde_json::Value, LlmParseError> {
    let trimmed = content.trim();
    let json_str = match JSON_FENCE.captures(trimmed) {
        Some(caps) => {
            debug!("Stripping Markdown fence from LLM output");
            caps.get(1).map_or(trimmed, |m| m.as_str().trim())
        }
        None => trimmed,
    };

    serde_json::from_str(json_str).map_err(|e| LlmParseError::Json(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::CannedTransport;

    fn enabled() -> LlmSettings {
        LlmSettings {
            enabled: true,
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_is_checked_first() {
        let parser = LlmCriteriaParser::new(LlmSettings::default());
        assert!(matches!(parser.parse("Adults."), Err(LlmParseError::Disabled)));
    }

    #[test]
    fn test_missing_key_before_empty_short_circuit() {
        let settings = LlmSettings {
            enabled: true,
            ..Default::default()
        };
        let parser = LlmCriteriaParser::new(settings);
        assert!(matches!(parser.parse(""), Err(LlmParseError::MissingApiKey)));
    }

    #[test]
    fn test_empty_text_makes_no_call() {
        let transport = Arc::new(CannedTransport::with_content("{\"rules\": []}"));
        let parser = LlmCriteriaParser::with_transport(enabled(), transport.clone());
        let extraction = parser.parse("  \n ").unwrap();
        assert!(extraction.rules.is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_fenced_content_is_accepted() {
        let root = parse_rules_json("```json\n{\"rules\": []}\n```").unwrap();
        assert!(root["rules"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_body_without_choices_is_malformed() {
        assert!(matches!(
            parse_completion_body("{\"choices\": []}"),
            Err(LlmParseError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_completion_body("not json"),
            Err(LlmParseError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_non_json_content_is_json_error() {
        let transport = Arc::new(CannedTransport::with_content("Sure! Here are the rules."));
        let parser = LlmCriteriaParser::with_transport(enabled(), transport);
        assert!(matches!(parser.parse("Adults."), Err(LlmParseError::Json(_))));
    }

    #[test]
    fn test_http_failure_is_transport_error() {
        let transport = Arc::new(CannedTransport::failing(500, "boom"));
        let parser = LlmCriteriaParser::with_transport(enabled(), transport);
        let err = parser.parse("Adults.").unwrap_err();
        assert!(matches!(
            err,
            LlmParseError::Transport(TransportError::Http { status: 500, .. })
        ));
    }
}
