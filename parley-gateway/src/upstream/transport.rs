//! Messages API wire types and the HTTP transport.

use async_trait::async_trait;
use parley_common::config::UpstreamConfig;
use parley_memory::HistoryEntry;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sends one Messages API request and returns the raw HTTP outcome.
///
/// Implementations do not retry and do not interpret the status code.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &MessagesRequest) -> Result<RawResponse, TransportError>;
}

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// The request never produced an HTTP response.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Failures that read like a temporary overload are worth retrying.
    pub fn is_transient(&self) -> bool {
        let message = self.message.to_lowercase();
        message.contains("overloaded") || message.contains("529")
    }
}

// ============================================================================
// Messages API Types
// ============================================================================

/// One message in the upstream conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamMessage {
    pub role: String,
    pub content: String,
}

impl UpstreamMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

impl From<&HistoryEntry> for UpstreamMessage {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            role: entry.kind.upstream_role().into(),
            content: entry.content.clone(),
        }
    }
}

/// Request body for the Messages API.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<UpstreamMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Successful Messages API response. Only the fields we read are required.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

// ============================================================================
// HTTP Transport
// ============================================================================

/// reqwest-backed transport for the Messages API.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Build a transport with the auth and version headers preset.
    pub fn from_config(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| anyhow::anyhow!("upstream.api_key is not configured"))?;

        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| anyhow::anyhow!("upstream.api_key contains invalid header characters"))?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-api-key", key);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&config.api_version)
                .map_err(|_| anyhow::anyhow!("upstream.api_version is not a valid header value"))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.api_url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &MessagesRequest) -> Result<RawResponse, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::new(format!("Request failed: {}", e.without_url())))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::new(format!("Failed to read response body: {}", e)))?;

        Ok(RawResponse { status, body })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").field("url", &self.url).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_memory::EntryKind;

    #[test]
    fn request_omits_unset_options() {
        let request = MessagesRequest {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 1024,
            messages: vec![UpstreamMessage::user("Hello")],
            system: None,
            temperature: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("system").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn response_tolerates_missing_usage_and_model() {
        let response: MessagesResponse =
            serde_json::from_str(r#"{"content":[{"type":"text","text":"hi"}]}"#).unwrap();
        assert!(response.usage.is_none());
        assert!(response.model.is_none());
        assert_eq!(response.content[0].text.as_deref(), Some("hi"));
    }

    #[test]
    fn summary_entries_become_user_messages() {
        let entry = HistoryEntry::new(EntryKind::Summary, "earlier talk");
        let message = UpstreamMessage::from(&entry);
        assert_eq!(message, UpstreamMessage::user("earlier talk"));
    }

    #[test]
    fn transient_transport_errors() {
        assert!(TransportError::new("upstream Overloaded").is_transient());
        assert!(TransportError::new("status 529").is_transient());
        assert!(!TransportError::new("connection refused").is_transient());
    }

    #[test]
    fn transport_requires_api_key() {
        let config = UpstreamConfig::default();
        assert!(HttpTransport::from_config(&config).is_err());

        let config = UpstreamConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let transport = HttpTransport::from_config(&config).unwrap();
        assert_eq!(transport.url(), "https://api.anthropic.com/v1/messages");
        assert!(!format!("{transport:?}").contains("sk-test"));
    }
}
