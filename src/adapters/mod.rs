//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for talking to hosted LLM
//! completion endpoints. The criteria parser only sees the
//! `CompletionTransport` trait, so tests can swap in `CannedTransport`.

pub mod openai;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// Re-export the OpenAI adapter
pub use openai::OpenAiClient;

/// Transport-level failure talking to the completion endpoint
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Could not connect to {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Endpoint returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Token accounting reported by the endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Blocking chat-completion transport
pub trait CompletionTransport: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// POST a JSON payload and return the raw response body
    fn post_completion(&self, payload: &serde_json::Value) -> Result<String, TransportError>;
}

/// Transport that replays a fixed response body and records every payload.
pub struct CannedTransport {
    response: Result<String, (u16, String)>,
    calls: AtomicUsize,
    payloads: Mutex<Vec<serde_json::Value>>,
}

impl CannedTransport {
    /// Reply with `body` and a 200 status
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            response: Ok(body.into()),
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Reply with a non-2xx status
    pub fn failing(status: u16, body: impl Into<String>) -> Self {
        Self {
            response: Err((status, body.into())),
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Build a chat-completion body whose message content is `content`
    pub fn with_content(content: &str) -> Self {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200},
        });
        Self::new(body.to_string())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads sent so far
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl CompletionTransport for CannedTransport {
    fn name(&self) -> &str {
        "canned"
    }

    fn post_completion(&self, payload: &serde_json::Value) -> Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut payloads) = self.payloads.lock() {
            payloads.push(payload.clone());
        }
        match &self.response {
            Ok(body) => Ok(body.clone()),
            Err((status, body)) => Err(TransportError::Http {
                status: *status,
                body: body.clone(),
            }),
        }
    }
}
