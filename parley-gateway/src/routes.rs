//! Route definitions for Parley Gateway.
//!
//! Provides the chat, history, catalog, stats, and health endpoints.
//! Request and response bodies use camelCase field names.

use crate::chat::ChatTurn;
use crate::models::{find_model, ModelInfo, MODELS};
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use parley_common::logging::{MetricsSummary, RequestContext};
use parley_common::request_span;
use parley_memory::{Session, StoreStats};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

/// Service name reported by health checks and request spans.
pub const SERVICE_NAME: &str = "parley-gateway";

// ============================================================================
// DTOs
// ============================================================================

/// Chat request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl From<ChatRequest> for ChatTurn {
    fn from(request: ChatRequest) -> Self {
        Self {
            message: request.message,
            session_id: request.session_id,
            system_prompt: request.system_prompt,
            model: request.model,
        }
    }
}

/// Chat response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub session_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub response_time_ms: u64,
    pub history_compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_error: Option<String>,
}

/// One history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub content: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// Session history response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<HistoryMessage>,
    pub message_count: usize,
    pub pairs_count: usize,
    pub created_at: i64,
    pub last_accessed_at: i64,
}

impl From<Session> for HistoryResponse {
    fn from(session: Session) -> Self {
        let messages = session
            .entries()
            .iter()
            .map(|entry| HistoryMessage {
                id: entry.id.clone(),
                message_type: entry.kind.as_str().to_string(),
                content: entry.content.clone(),
                timestamp: entry.timestamp_millis(),
            })
            .collect();

        Self {
            session_id: session.id().to_string(),
            message_count: session.len(),
            pairs_count: session.pair_count(),
            created_at: session.created_at().timestamp_millis(),
            last_accessed_at: session.last_accessed_at().timestamp_millis(),
            messages,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Compression settings reported by `/api/stats`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInfo {
    pub compression_threshold: usize,
    pub pairs_per_pass: usize,
    pub max_idle_secs: u64,
}

/// Store and turn statistics.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub sessions: StoreStats,
    pub policy: PolicyInfo,
    pub metrics: MetricsSummary,
}

/// Known models and the configured default.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub models: &'static [ModelInfo],
    pub default_model: String,
    /// Whether the configured default appears in `models`
    pub default_model_known: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// Error wrapper that renders as `{error, code}` with the matching status.
#[derive(Debug)]
pub struct ApiError(pub parley_common::Error);

impl<E: Into<parley_common::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.code(), "Request failed");
        }

        let body = ErrorResponse {
            error: self.0.public_message(),
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build all API routes with shared state.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/history/:session_id", get(history_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/models", get(models_handler))
        .route("/api/health", get(health_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Run one chat turn.
async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected chat request body");
        parley_common::Error::InvalidInput(format!("Invalid request body: {}", rejection.body_text()))
    })?;

    let ctx = RequestContext::from_headers(&headers, SERVICE_NAME);
    let span = request_span!(
        "chat_turn",
        ctx.trace_id,
        span_id = %ctx.span_id,
        endpoint = "/api/chat"
    );

    let result = state
        .chat
        .handle_turn(ChatTurn::from(request))
        .instrument(span)
        .await?;

    Ok(Json(ChatResponse {
        response: result.answer,
        session_id: result.session_id,
        model: result.model,
        input_tokens: result.input_tokens,
        output_tokens: result.output_tokens,
        total_tokens: result.total_tokens,
        response_time_ms: result.latency_ms,
        history_compressed: result.history_compressed,
        compression_error: result.compression_error,
    }))
}

/// Read a session's history without touching it.
async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    if session_id.trim().is_empty() {
        return Err(parley_common::Error::InvalidInput("Session ID is required".into()).into());
    }

    let session = state
        .chat
        .store()
        .get(&session_id)
        .ok_or_else(|| parley_common::Error::NotFound("Session not found".into()))?;

    Ok(Json(session.into()))
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let policy = state.chat.compressor().policy();
    Json(StatsResponse {
        sessions: state.chat.store().stats(),
        policy: PolicyInfo {
            compression_threshold: policy.threshold(),
            pairs_per_pass: policy.pairs_per_pass(),
            max_idle_secs: state.max_idle.as_secs(),
        },
        metrics: state.chat.metrics().summary().await,
    })
}

async fn models_handler(State(state): State<AppState>) -> Json<ModelsResponse> {
    let default_model = state.chat.default_model();
    Json(ModelsResponse {
        models: MODELS,
        default_model_known: find_model(default_model).is_some(),
        default_model: default_model.to_string(),
    })
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: SERVICE_NAME.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_memory::{HistoryEntry, SessionStore};

    #[test]
    fn chat_request_uses_camel_case() {
        let request: ChatRequest = serde_json::from_str(
            r#"{"message":"hi","sessionId":"abc","systemPrompt":"terse","model":"m"}"#,
        )
        .unwrap();
        let turn = ChatTurn::from(request);
        assert_eq!(turn.session_id.as_deref(), Some("abc"));
        assert_eq!(turn.system_prompt.as_deref(), Some("terse"));
        assert_eq!(turn.model.as_deref(), Some("m"));
    }

    #[test]
    fn history_response_shape() {
        let store = SessionStore::new();
        let id = store.get_or_create(None).id().to_string();
        store.append_user(&id, "q").unwrap();
        store.append_assistant(&id, "a").unwrap();
        store
            .with_session_mut(&id, |s| s.push(HistoryEntry::summary("s")))
            .unwrap();

        let response = HistoryResponse::from(store.get(&id).unwrap());
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["sessionId"], id.as_str());
        assert_eq!(json["messageCount"], 3);
        assert_eq!(json["pairsCount"], 1);
        assert_eq!(json["messages"][0]["type"], "USER");
        assert_eq!(json["messages"][1]["type"], "ASSISTANT");
        assert_eq!(json["messages"][2]["type"], "SUMMARY");
        assert!(json["messages"][0]["timestamp"].as_i64().unwrap() > 0);
        assert!(json["lastAccessedAt"].as_i64().unwrap() >= json["createdAt"].as_i64().unwrap());
    }

    #[test]
    fn compression_error_is_omitted_when_absent() {
        let response = ChatResponse {
            response: "x".into(),
            session_id: "s".into(),
            model: "m".into(),
            input_tokens: 1,
            output_tokens: 2,
            total_tokens: 3,
            response_time_ms: 4,
            history_compressed: false,
            compression_error: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("compressionError").is_none());
        assert_eq!(json["responseTimeMs"], 4);
        assert_eq!(json["historyCompressed"], false);
    }

    #[test]
    fn api_error_hides_internal_details() {
        let response =
            ApiError(parley_common::Error::Internal("mutex poisoned".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
