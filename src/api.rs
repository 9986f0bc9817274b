use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use futures::Stream;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::pipeline::{GenerationPipeline, GenerationRequest};
use crate::sandbox::{SandboxHandle, SandboxPool};
use crate::stream::{self, ProgressEvent};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub pipeline: Arc<GenerationPipeline>,
    pub pool: Arc<SandboxPool>,
}

impl AppState {
    pub fn new(pipeline: GenerationPipeline) -> Self {
        let pool = Arc::clone(pipeline.pool());
        Self {
            pipeline: Arc::new(pipeline),
            pool,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Response payload types ────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrewarmResponse {
    pub sandbox_id: String,
    pub url: String,
}

impl From<SandboxHandle> for PrewarmResponse {
    fn from(handle: SandboxHandle) -> Self {
        Self {
            sandbox_id: handle.id,
            url: handle.endpoint,
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/sandbox/prewarm", post(prewarm_sandbox))
        .route("/api/sandbox/prewarmed", get(get_prewarmed))
        .route("/api/sandbox/{id}", delete(destroy_sandbox))
        .route("/health", get(health_check))
}

/// One SSE frame per progress event: `event: <name>` and a JSON `data:` line.
pub fn sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Runs the pipeline on its own task; the response stream ends when the
/// pipeline drops its sink. Dropping the response closes the receiver,
/// which the pipeline treats as a disconnect.
async fn generate(
    State(state): State<SharedState>,
    Json(request): Json<GenerationRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (sink, rx) = stream::channel();
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        pipeline.run(request, sink).await;
    });

    let events = UnboundedReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

async fn prewarm_sandbox(
    State(state): State<SharedState>,
) -> Result<Json<PrewarmResponse>, ApiError> {
    let handle = state.pool.prewarm().await.map_err(|e| {
        warn!(error = %e, "pre-warm failed");
        ApiError::Unavailable(format!("Sandbox provisioning failed: {}", e))
    })?;
    Ok(Json(handle.into()))
}

async fn get_prewarmed(State(state): State<SharedState>) -> Result<Json<SandboxHandle>, ApiError> {
    state
        .pool
        .prewarmed()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No pre-warmed sandbox".to_string()))
}

async fn destroy_sandbox(State(state): State<SharedState>, Path(id): Path<String>) -> StatusCode {
    info!(sandbox_id = %id, "destroy requested");
    state.pool.destroy(&id).await;
    StatusCode::NO_CONTENT
}
