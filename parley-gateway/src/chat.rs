//! Conversation orchestrator.
//!
//! One chat turn runs through these states:
//!
//! ```text
//! Received → SessionResolved → CompressionCheck → MainCallInFlight → Completed
//!     │                                                  │
//!     └──────────────────── Failed ◄─────────────────────┘
//! ```
//!
//! The user entry is appended before the upstream call and stays in the
//! history when that call fails. Compression is best-effort: its failures
//! are logged and the turn continues with the uncompressed history.

use crate::upstream::{AnswerFormat, UpstreamClient, UpstreamError, UpstreamErrorKind, UpstreamMessage};
use parley_common::logging::Metrics;
use parley_memory::{HistoryCompressor, MemoryError, SessionStore};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Prefix of every upstream failure shown to callers.
pub const UPSTREAM_FAILURE_PREFIX: &str = "Failed to get response from AI";

/// Input of one chat turn.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    pub message: String,
    pub session_id: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

impl ChatTurn {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Outcome of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub answer: String,
    pub answer_format: AnswerFormat,
    pub session_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub latency_ms: u64,
    pub attempts: u32,
    pub history_compressed: bool,
    /// Set only when compression failed and failure reporting is enabled
    pub compression_error: Option<String>,
}

/// Turn-level failure.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("{0}")]
    Validation(String),

    #[error("{}: {}", UPSTREAM_FAILURE_PREFIX, .0)]
    Upstream(#[from] UpstreamError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// The session was resolved at the start of the turn, so losing it
/// afterwards (an eviction sweep racing the turn) is an internal failure.
impl From<MemoryError> for TurnError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::SessionNotFound(id) => {
                Self::Internal(format!("session {} disappeared during the turn", id))
            }
        }
    }
}

impl From<TurnError> for parley_common::Error {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::Validation(msg) => Self::InvalidInput(msg),
            TurnError::Upstream(upstream) => {
                let msg = format!("{}: {}", UPSTREAM_FAILURE_PREFIX, upstream);
                match upstream.kind {
                    UpstreamErrorKind::Overloaded => Self::Unavailable(msg),
                    _ => Self::External(msg),
                }
            }
            TurnError::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// Per-turn state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    SessionResolved,
    CompressionCheck,
    MainCallInFlight,
    Completed,
    Failed,
}

impl TurnState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::SessionResolved => "session_resolved",
            Self::CompressionCheck => "compression_check",
            Self::MainCallInFlight => "main_call_in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for [`ChatService`].
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_message_chars: usize,
    pub report_compression_failures: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_message_chars: 32_000,
            report_compression_failures: false,
        }
    }
}

/// Runs chat turns against the session store and the upstream client.
pub struct ChatService {
    store: Arc<SessionStore>,
    client: Arc<UpstreamClient>,
    compressor: HistoryCompressor,
    metrics: Metrics,
    options: ChatOptions,
}

impl ChatService {
    pub fn new(
        store: Arc<SessionStore>,
        client: Arc<UpstreamClient>,
        compressor: HistoryCompressor,
        options: ChatOptions,
    ) -> Self {
        Self {
            store,
            client,
            compressor,
            metrics: Metrics::new(),
            options,
        }
    }

    /// Share an existing metrics collector.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn compressor(&self) -> &HistoryCompressor {
        &self.compressor
    }

    pub fn default_model(&self) -> &str {
        self.client.default_model()
    }

    /// Run one chat turn and record its metrics.
    pub async fn handle_turn(&self, turn: ChatTurn) -> Result<TurnResult, TurnError> {
        let start = Instant::now();
        let result = self.run_turn(turn).await;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics.record_request(duration_ms, result.is_ok()).await;

        if let Err(e) = &result {
            tracing::warn!(state = %TurnState::Failed, error = %e, duration_ms, "Chat turn failed");
        }
        result
    }

    async fn run_turn(&self, turn: ChatTurn) -> Result<TurnResult, TurnError> {
        tracing::debug!(
            state = %TurnState::Received,
            message_chars = turn.message.chars().count(),
            has_session = turn.session_id.is_some(),
            "Chat turn received"
        );
        let turn = self.validate(turn)?;

        let session = self.store.get_or_create(turn.session_id.as_deref());
        let session_id = session.id().to_string();
        tracing::debug!(
            state = %TurnState::SessionResolved,
            session_id = %session_id,
            resumed = turn.session_id.as_deref() == Some(session_id.as_str()),
            entries = session.len(),
            "Session resolved"
        );

        self.store.append_user(&session_id, turn.message.as_str())?;

        tracing::debug!(state = %TurnState::CompressionCheck, session_id = %session_id, "Checking history size");
        let (history_compressed, compression_error) =
            match self.compressor.maybe_compress(&self.store, &session_id).await {
                Ok(Some(_)) => {
                    self.metrics.record_compression().await;
                    (true, None)
                }
                Ok(None) => (false, None),
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "History compression failed, continuing uncompressed"
                    );
                    let reported = self.options.report_compression_failures.then(|| e.to_string());
                    (false, reported)
                }
            };

        let messages = self.store.with_session(&session_id, |session| {
            session
                .entries()
                .iter()
                .map(UpstreamMessage::from)
                .collect::<Vec<_>>()
        })?;

        tracing::debug!(
            state = %TurnState::MainCallInFlight,
            session_id = %session_id,
            messages = messages.len(),
            model = turn.model.as_deref().unwrap_or(self.client.default_model()),
            "Calling upstream"
        );
        let completion = self
            .client
            .send(messages, turn.system_prompt.as_deref(), turn.model.as_deref())
            .await?;

        self.store.append_assistant(&session_id, completion.answer.as_str())?;

        tracing::info!(
            state = %TurnState::Completed,
            session_id = %session_id,
            model = %completion.model,
            total_tokens = completion.usage.total_tokens,
            latency_ms = completion.latency_ms(),
            history_compressed,
            "Chat turn completed"
        );

        Ok(TurnResult {
            latency_ms: completion.latency_ms(),
            answer_format: completion.format,
            input_tokens: completion.usage.input_tokens,
            output_tokens: completion.usage.output_tokens,
            total_tokens: completion.usage.total_tokens,
            attempts: completion.attempts,
            answer: completion.answer,
            model: completion.model,
            session_id,
            history_compressed,
            compression_error,
        })
    }

    /// Reject bad input before any session is touched.
    ///
    /// A blank session id counts as absent.
    fn validate(&self, mut turn: ChatTurn) -> Result<ChatTurn, TurnError> {
        if turn.message.trim().is_empty() {
            return Err(TurnError::Validation("Message cannot be empty".into()));
        }

        let chars = turn.message.chars().count();
        if chars > self.options.max_message_chars {
            return Err(TurnError::Validation(format!(
                "Message is too long: {} characters (limit {})",
                chars, self.options.max_message_chars
            )));
        }

        for (name, value) in [("systemPrompt", &turn.system_prompt), ("model", &turn.model)] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(TurnError::Validation(format!("{} cannot be blank", name)));
            }
        }

        turn.session_id = turn
            .session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok(turn)
    }
}

impl std::fmt::Debug for ChatService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatService")
            .field("sessions", &self.store.len())
            .field("compressor", &self.compressor)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
