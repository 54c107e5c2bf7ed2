use crate::types::{EndpointHealth, ToolHealth};
use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use mcpipe_core::{StatusSink, StatusSnapshot};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct AppState {
    sink: Arc<dyn StatusSink>,
}

/// Read-only HTTP view of the status sink.
///
/// - `GET /health`: liveness
/// - `GET /status`: the whole status document
/// - `GET /endpoint-status`: per-endpoint connectivity
/// - `GET /tool-status`: per-target run state
pub struct StatusServer {
    sink: Arc<dyn StatusSink>,
    addr: String,
}

impl StatusServer {
    pub fn new(sink: Arc<dyn StatusSink>, addr: impl Into<String>) -> Self {
        Self {
            sink,
            addr: addr.into(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/status", get(full_status))
            .route("/endpoint-status", get(endpoint_status))
            .route("/tool-status", get(tool_status))
            .layer(CorsLayer::permissive())
            .with_state(AppState {
                sink: self.sink.clone(),
            })
    }

    /// Serve until `shutdown` flips to `true`.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Status API failed to bind {}", self.addr))?;
        tracing::info!("Status API listening on {}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .context("Status API server error")
    }

    /// Spawn [`serve`](Self::serve) as a background task; failures are logged.
    pub fn start(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve(shutdown).await {
                tracing::error!("{:#}", e);
            }
        })
    }
}

// ============================================================================
// Route handlers
// ============================================================================

async fn health() -> &'static str {
    "ok"
}

async fn full_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.sink.snapshot().await)
}

async fn endpoint_status(State(state): State<AppState>) -> Json<BTreeMap<String, EndpointHealth>> {
    let snapshot = state.sink.snapshot().await;
    Json(
        snapshot
            .endpoints
            .iter()
            .map(|(name, ep)| (name.clone(), EndpointHealth::from(ep)))
            .collect(),
    )
}

async fn tool_status(State(state): State<AppState>) -> Json<BTreeMap<String, ToolHealth>> {
    let snapshot = state.sink.snapshot().await;
    Json(
        snapshot
            .tools
            .iter()
            .map(|(target, t)| (target.clone(), ToolHealth::from(t)))
            .collect(),
    )
}
