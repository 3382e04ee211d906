//! OpenAI-compatible chat-completion adapter.
//!
//! One blocking POST per call. Callers on an async runtime must wrap calls
//! in `spawn_blocking`.

use std::time::Duration;

use tracing::debug;

use super::{CompletionTransport, TransportError};

/// HTTP client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiClient {
    endpoint: String,
    api_key: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client,
            timeout_secs,
        })
    }
}

impl CompletionTransport for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn post_completion(&self, payload: &serde_json::Value) -> Result<String, TransportError> {
        debug!(endpoint = %self.endpoint, "Posting completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    TransportError::Connection(self.endpoint.clone())
                } else if e.is_timeout() {
                    TransportError::Timeout(self.timeout_secs)
                } else {
                    TransportError::Client(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .text()
            .map_err(|e| TransportError::Client(e.to_string()))
    }
}
