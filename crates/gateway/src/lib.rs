//! HTTP entry point for lorekeep.
//!
//! `POST /api/pipeline/start` launches a pipeline in the background,
//! `GET /api/pipeline/status/{client_id}` reports on it, and `GET /health`
//! answers liveness probes. At most one pipeline runs per client; the
//! [`PipelineRegistry`] entry lives exactly as long as the spawned run.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use lorekeep_config::GatewayConfig;
use lorekeep_pipeline::{PipelineRegistry, RunGuard, Services};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub services: Services,
    pub registry: PipelineRegistry,
    /// Required on `start` when set.
    pub auth_token: Option<String>,
}

impl GatewayState {
    pub fn new(services: Services) -> Self {
        let auth_token = services.config.gateway.auth_token.clone().filter(|t| !t.is_empty());
        Self {
            services,
            registry: PipelineRegistry::new(),
            auth_token,
        }
    }
}

type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/pipeline/start", post(start_handler))
        .route("/api/pipeline/status/{client_id}", get(status_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind `config.host:config.port` and serve until the listener fails.
pub async fn serve(services: Services, config: &GatewayConfig) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::new(GatewayState::new(services)));

    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct StartRequest {
    client_id: String,
    /// Accepted in place of an `Authorization` header.
    #[serde(default)]
    auth_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub status: String,
    pub message: String,
}

async fn start_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<StartRequest>,
) -> Result<Json<StartResponse>, StatusCode> {
    authorize(&state, &headers, payload.auth_token.as_deref())?;

    let client_id = payload.client_id.trim();
    if client_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let Some(guard) = state.registry.start(client_id) else {
        info!(client_id, "Pipeline already running");
        return Ok(Json(StartResponse {
            status: "already_running".into(),
            message: format!("Pipeline already running for client {client_id}"),
        }));
    };

    tokio::spawn(run_pipeline(state.services.clone(), guard));

    Ok(Json(StartResponse {
        status: "started".into(),
        message: format!("Pipeline started for client {client_id}"),
    }))
}

/// Runs one pipeline to the end. The guard unregisters the client however
/// the run finishes.
async fn run_pipeline(services: Services, guard: RunGuard) {
    let client_id = guard.client_id().to_string();
    let sources = services.resolve_sources(&client_id).await;

    match services.orchestrator(&client_id).run(sources).await {
        Ok(outcome) => info!(
            client_id,
            reports = outcome.reports,
            open_contradictions = outcome.open_contradictions,
            entries_written = outcome.entries_written,
            "Pipeline completed"
        ),
        Err(e) => error!(client_id, error = %e, "Pipeline failed"),
    }
    drop(guard);
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `running` or `idle`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// The backend's record of the client's pipeline, when reachable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Value>,
}

async fn status_handler(State(state): State<SharedState>, Path(client_id): Path<String>) -> Json<StatusResponse> {
    let run = state.registry.get(&client_id);
    let pipeline = state.services.backend.pipeline_status(&client_id).await;
    Json(StatusResponse {
        status: if run.is_some() { "running" } else { "idle" }.into(),
        started_at: run.map(|r| r.started_at),
        pipeline,
    })
}

fn authorize(state: &GatewayState, headers: &HeaderMap, body_token: Option<&str>) -> Result<(), StatusCode> {
    let Some(expected) = state.auth_token.as_deref() else {
        return Ok(());
    };
    let bearer = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if bearer == Some(expected) || body_token == Some(expected) {
        Ok(())
    } else {
        warn!("Unauthorized pipeline start: missing or invalid token");
        Err(StatusCode::UNAUTHORIZED)
    }
}
