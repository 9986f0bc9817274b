use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::ServerSection;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, settings: &ServerSection) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(DefaultBodyLimit::max(settings.max_body_mb * 1024 * 1024))
        .layer(TraceLayer::new_for_http());

    if settings.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Serve until Ctrl+C, then destroy the pre-warmed sandbox.
pub async fn start_server(state: Arc<AppState>, settings: &ServerSection) -> Result<()> {
    let pool = Arc::clone(&state.pool);
    let app = build_router(state, settings);

    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, dev_mode = settings.dev_mode, "server listening");
    println!("Sketchpad running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.shutdown().await;
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSection;
    use crate::llm::{CodeModel, ToolModel};
    use crate::pipeline::GenerationPipeline;
    use crate::sandbox::SandboxPool;
    use crate::testing::{ScriptedCodeModel, ScriptedProvider, ScriptedToolModel, test_config};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router(settings: &ServerSection) -> Router {
        let config = test_config();
        let provider = Arc::new(ScriptedProvider::new());
        let pool = Arc::new(SandboxPool::new(provider, config.sandbox.clone()));
        let code_model: Arc<dyn CodeModel> = Arc::new(ScriptedCodeModel::new(vec![]));
        let tool_model: Arc<dyn ToolModel> = Arc::new(ScriptedToolModel::new(vec![]));
        let pipeline = GenerationPipeline::new(&config, pool, code_model, tool_model);
        build_router(Arc::new(AppState::new(pipeline)), settings)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router(&ServerSection::default());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_dev_mode_allows_cross_origin() {
        let settings = ServerSection {
            dev_mode: true,
            ..ServerSection::default()
        };
        let app = test_router(&settings);
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_cross_origin_is_not_allowed_outside_dev_mode() {
        let app = test_router(&ServerSection::default());
        let req = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_body_limit_rejects_oversized_request() {
        let settings = ServerSection {
            max_body_mb: 1,
            ..ServerSection::default()
        };
        let app = test_router(&settings);
        let image = "A".repeat(2 * 1024 * 1024);
        let req = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::json!({"image": image}).to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_server_section_default() {
        let settings = ServerSection::default();
        assert_eq!(settings.port, 3141);
        assert_eq!(settings.host, "127.0.0.1");
        assert!(!settings.dev_mode);
    }
}
