//! Resilient Messages API client.

use super::answer::ExtractedAnswer;
use super::retry::{classify_status, RetryPolicy, Sleeper, StatusClass, TokioSleeper};
use super::transport::{MessagesRequest, MessagesResponse, Transport, UpstreamMessage};
use super::{truncate, Completion, TokenUsage, UpstreamError, UpstreamErrorKind, MAX_ERROR_BODY_CHARS};
use async_trait::async_trait;
use parley_common::config::{RetryConfig, UpstreamConfig};
use parley_memory::{HistoryEntry, Summarizer, SUMMARY_INSTRUCTION};
use std::sync::Arc;
use std::time::Instant;

/// System prompt used for history summaries.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You condense conversations for later reference. \
Reply with the summary as plain text, without preamble.";

/// Request fields applied when a call does not override them.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDefaults {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
}

impl From<&UpstreamConfig> for RequestDefaults {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
        }
    }
}

/// Client with retry on transient overload and JSON-or-raw answer parsing.
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    defaults: RequestDefaults,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, defaults: RequestDefaults) -> Self {
        Self {
            transport,
            sleeper: Arc::new(TokioSleeper),
            retry,
            defaults,
        }
    }

    /// Build from configuration sections.
    pub fn from_config(
        transport: Arc<dyn Transport>,
        upstream: &UpstreamConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self::new(transport, RetryPolicy::from(retry), RequestDefaults::from(upstream))
    }

    /// Replace the sleeper used between attempts.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn default_model(&self) -> &str {
        &self.defaults.model
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send `messages` and return the parsed completion.
    pub async fn send(
        &self,
        messages: Vec<UpstreamMessage>,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<Completion, UpstreamError> {
        let start = Instant::now();
        let request = self.build_request(messages, system_prompt, model);

        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            has_system = request.system.is_some(),
            "Sending upstream request"
        );

        let (body, attempts) = self.send_with_retry(&request).await?;

        let response: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            UpstreamError::new(
                UpstreamErrorKind::MalformedResponse,
                format!(
                    "Failed to parse upstream response: {} - {}",
                    e,
                    truncate(&body, MAX_ERROR_BODY_CHARS)
                ),
                None,
            )
        })?;

        let text = response
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .ok_or_else(|| {
                UpstreamError::new(
                    UpstreamErrorKind::EmptyResponse,
                    "No content in upstream response",
                    None,
                )
            })?;

        let extracted = ExtractedAnswer::parse(&text);
        let usage = response.usage.unwrap_or_default();
        let latency = start.elapsed();

        let completion = Completion {
            format: extracted.format(),
            answer: extracted.into_text(),
            model: response.model.unwrap_or(request.model),
            usage: TokenUsage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
            },
            stop_reason: response.stop_reason,
            latency,
            attempts,
        };

        tracing::info!(
            model = %completion.model,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            total_tokens = completion.usage.total_tokens,
            latency_ms = completion.latency_ms(),
            attempts,
            "Upstream call completed"
        );

        Ok(completion)
    }

    fn build_request(
        &self,
        messages: Vec<UpstreamMessage>,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> MessagesRequest {
        MessagesRequest {
            model: model.unwrap_or(&self.defaults.model).to_string(),
            max_tokens: self.defaults.max_tokens,
            messages,
            system: system_prompt
                .map(str::to_string)
                .or_else(|| self.defaults.system_prompt.clone()),
            temperature: self.defaults.temperature,
        }
    }

    /// Run attempts until success, a terminal failure, or the attempt cap.
    ///
    /// Returns the 2xx body and the number of attempts used.
    async fn send_with_retry(
        &self,
        request: &MessagesRequest,
    ) -> Result<(String, u32), UpstreamError> {
        let max_attempts = self.retry.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.transport.send(request).await {
                Ok(raw) => match classify_status(raw.status) {
                    StatusClass::Success => {
                        if attempt > 1 {
                            tracing::info!(attempt, "Upstream recovered after retries");
                        }
                        return Ok((raw.body, attempt));
                    }
                    StatusClass::Overloaded => {
                        tracing::warn!(
                            status = raw.status,
                            attempt,
                            max_attempts,
                            body = %truncate(&raw.body, MAX_ERROR_BODY_CHARS),
                            "Upstream overloaded"
                        );
                        if !self.retry.has_attempts_after(attempt) {
                            return Err(UpstreamError::overloaded(Some(raw.status), &raw.body, attempt));
                        }
                    }
                    StatusClass::Rejected => {
                        tracing::error!(
                            status = raw.status,
                            body = %truncate(&raw.body, MAX_ERROR_BODY_CHARS),
                            "Upstream rejected request"
                        );
                        return Err(UpstreamError::rejected(raw.status, &raw.body));
                    }
                },
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, attempt, max_attempts, "Transient transport failure");
                    if !self.retry.has_attempts_after(attempt) {
                        return Err(UpstreamError::overloaded(None, &e.message, attempt));
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "Upstream transport failure");
                    return Err(UpstreamError::new(UpstreamErrorKind::Transport, e.message, None));
                }
            }

            let delay = self.retry.delay_for(attempt);
            tracing::info!(delay_ms = delay.as_millis() as u64, "Retrying upstream call");
            self.sleeper.sleep(delay).await;
        }
    }
}

#[async_trait]
impl Summarizer for UpstreamClient {
    async fn summarize(&self, entries: &[HistoryEntry]) -> anyhow::Result<String> {
        let mut messages: Vec<UpstreamMessage> = entries.iter().map(UpstreamMessage::from).collect();
        messages.push(UpstreamMessage::user(SUMMARY_INSTRUCTION));

        let completion = self.send(messages, Some(SUMMARY_SYSTEM_PROMPT), None).await?;
        Ok(completion.answer)
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("retry", &self.retry)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
