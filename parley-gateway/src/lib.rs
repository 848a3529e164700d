//! Parley Gateway - Session-aware chat proxy for a hosted language model.
//!
//! This crate provides the HTTP service:
//! - Chat turns with per-session history
//! - Automatic compression of long histories into summaries
//! - Retry with backoff on upstream overload
//! - History, stats, model catalog, and health endpoints
//!
//! ## Architecture
//!
//! ```text
//! Client → Gateway (validate → session → compress? → upstream) → Messages API
//!                        ↓
//!                  SessionStore ← sweeper (idle eviction)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod chat;
pub mod models;
pub mod routes;
pub mod upstream;

pub use chat::{ChatOptions, ChatService, ChatTurn, TurnError, TurnResult, TurnState};
pub use upstream::{
    Completion, HttpTransport, Transport, UpstreamClient, UpstreamError, UpstreamErrorKind,
};

use anyhow::Context;
use axum::Router;
use parley_common::config::Config;
use parley_memory::{spawn_sweeper, CompressionPolicy, HistoryCompressor, SessionStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    /// Idle age after which the sweeper evicts a session
    pub max_idle: Duration,
}

/// Build state with the HTTP transport from configuration.
pub fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let transport = HttpTransport::from_config(&config.upstream)
        .context("Failed to build upstream transport")?;
    build_state_with_transport(config, Arc::new(transport))
}

/// Build state around a caller-supplied transport.
pub fn build_state_with_transport(
    config: &Config,
    transport: Arc<dyn Transport>,
) -> anyhow::Result<AppState> {
    if models::find_model(&config.upstream.model).is_none() {
        tracing::warn!(
            model = %config.upstream.model,
            "Configured model is not in the catalog; upstream will decide if it exists"
        );
    }

    let store = Arc::new(SessionStore::new());
    let client = Arc::new(UpstreamClient::from_config(
        transport,
        &config.upstream,
        &config.retry,
    ));

    let policy = CompressionPolicy::new(
        config.memory.compression_threshold,
        config.memory.pairs_per_pass,
    )?;
    let compressor = HistoryCompressor::new(policy, client.clone());

    let chat = ChatService::new(
        store,
        client,
        compressor,
        ChatOptions {
            max_message_chars: config.chat.max_message_chars,
            report_compression_failures: config.memory.report_compression_failures,
        },
    );

    Ok(AppState {
        chat: Arc::new(chat),
        max_idle: config.memory.max_idle(),
    })
}

/// Build the gateway router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    routes::api_routes(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
}

/// Start the gateway server.
///
/// Runs the idle-session sweeper alongside the listener and stops both on
/// Ctrl-C or SIGTERM.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.network.bind.parse::<std::net::IpAddr>()?,
        config.network.port,
    ));

    let state = build_state(config)?;
    let sweeper = spawn_sweeper(
        Arc::clone(state.chat.store()),
        config.memory.sweep_interval(),
        config.memory.max_idle(),
    );

    let router = build_router(state);

    tracing::info!(
        model = %config.upstream.model,
        compression_threshold = config.memory.compression_threshold,
        pairs_per_pass = config.memory.pairs_per_pass,
        "Starting Parley Gateway on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    served.context("Server error")?;

    tracing::info!("Parley Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM, using Ctrl-C only");
                wait_for_ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = wait_for_ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
