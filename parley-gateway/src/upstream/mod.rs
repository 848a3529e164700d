//! Client for the hosted model's Messages API.
//!
//! - [`Transport`]: one HTTP exchange, no interpretation
//! - [`retry`]: overload classification and quadratic backoff
//! - [`answer`]: JSON-or-raw answer extraction
//! - [`UpstreamClient`]: request building, retries, response parsing

pub mod answer;
mod client;
pub mod retry;
pub mod transport;

pub use answer::{AnswerFormat, ExtractedAnswer};
pub use client::{RequestDefaults, UpstreamClient, SUMMARY_SYSTEM_PROMPT};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use transport::{
    HttpTransport, MessagesRequest, MessagesResponse, RawResponse, Transport, TransportError,
    UpstreamMessage,
};

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Upstream bodies are cut to this many characters in error messages.
pub const MAX_ERROR_BODY_CHARS: usize = 512;

/// Failure category of an upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// Still overloaded after the retry budget
    Overloaded,
    /// Non-retryable status
    UpstreamRejected,
    /// Response had no text content
    EmptyResponse,
    /// Network failure before a response arrived
    Transport,
    /// 2xx body that does not decode
    MalformedResponse,
}

impl UpstreamErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overloaded => "overloaded",
            Self::UpstreamRejected => "upstream_rejected",
            Self::EmptyResponse => "empty_response",
            Self::Transport => "transport",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

impl std::fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error from an upstream call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            kind,
            message: message.into(),
            status,
        }
    }

    pub(crate) fn overloaded(status: Option<u16>, detail: &str, attempts: u32) -> Self {
        let message = match status {
            Some(status) => format!(
                "Upstream API overloaded after {} attempts: status {} - {}",
                attempts,
                status,
                truncate(detail, MAX_ERROR_BODY_CHARS)
            ),
            None => format!(
                "Upstream API overloaded after {} attempts: {}",
                attempts,
                truncate(detail, MAX_ERROR_BODY_CHARS)
            ),
        };
        Self::new(UpstreamErrorKind::Overloaded, message, status)
    }

    pub(crate) fn rejected(status: u16, body: &str) -> Self {
        let detail = match serde_json::from_str::<transport::ApiErrorBody>(body) {
            Ok(parsed) => format!("{}: {}", parsed.error.error_type, parsed.error.message),
            Err(_) => body.to_string(),
        };
        Self::new(
            UpstreamErrorKind::UpstreamRejected,
            format!(
                "Upstream API error: status {} - {}",
                status,
                truncate(&detail, MAX_ERROR_BODY_CHARS)
            ),
            Some(status),
        )
    }

    pub fn is_overloaded(&self) -> bool {
        self.kind == UpstreamErrorKind::Overloaded
    }
}

/// Cut `text` to at most `max` characters on a char boundary.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Token usage of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Successful upstream call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Final answer text
    pub answer: String,
    pub format: AnswerFormat,
    /// Model reported by the upstream, or the requested one
    pub model: String,
    pub usage: TokenUsage,
    pub stop_reason: Option<String>,
    /// Wall-clock time including retries
    pub latency: Duration,
    pub attempts: u32,
}

impl Completion {
    pub fn latency_ms(&self) -> u64 {
        u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX)
    }
}
