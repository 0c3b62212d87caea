use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Query, ws::WebSocketUpgrade},
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::adapters::default_capabilities;
use super::api::{self, AppState};
use super::capabilities::Capabilities;
use super::events::{EventBus, EventFilter};
use super::workspace::WorkspaceManager;
use super::ws;
use crate::config::MigratorConfig;

/// Build the full application router: REST API, event stream and tracing.
pub fn build_router(state: Arc<AppState>, cors_permissive: bool) -> Router {
    let events = state.registry.events().clone();

    let mut app = api::api_router()
        .route(
            "/ws",
            get(
                move |ws_upgrade: WebSocketUpgrade, filter: Query<EventFilter>| {
                    ws::ws_handler(ws_upgrade, filter, events)
                },
            ),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Start the registry with the given capabilities and its HTTP front end.
/// Returns after Ctrl+C once every running job has been cancelled and
/// cleaned up.
pub async fn serve(config: MigratorConfig, caps: Capabilities) -> Result<()> {
    let workspaces = WorkspaceManager::new(config.workspace.root.clone());
    if config.workspace.sweep_on_start {
        match workspaces.sweep_stale() {
            Ok(0) => {}
            Ok(n) => info!(removed = n, root = %workspaces.root().display(), "removed stale workspaces"),
            Err(e) => warn!(error = %e, "failed to sweep stale workspaces"),
        }
    }
    std::fs::create_dir_all(&config.workspace.artifacts_root).with_context(|| {
        format!(
            "Failed to create artifacts directory: {}",
            config.workspace.artifacts_root.display()
        )
    })?;

    let state = Arc::new(AppState::new(config.registry_settings(), caps, EventBus::new()));
    let app = build_router(Arc::clone(&state), config.server.cors_permissive);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        max_jobs = config.pipeline.max_concurrent_jobs,
        workspace = %config.workspace.root.display(),
        "migration service listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("cancelling running jobs");
    state.registry.shutdown().await;
    info!("server shut down gracefully");
    Ok(())
}

/// Start the server with the default capability adapters.
pub async fn start_server(config: MigratorConfig) -> Result<()> {
    let caps = default_capabilities(&config);
    serve(config, caps).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C; shutdown signal disabled");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_router(tmp: &TempDir, cors: bool) -> Router {
        let mut config = MigratorConfig::default();
        config.workspace.root = tmp.path().join("work");
        config.workspace.artifacts_root = tmp.path().join("artifacts");
        let state = AppState::new(
            config.registry_settings(),
            default_capabilities(&config),
            EventBus::new(),
        );
        build_router(Arc::new(state), cors)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let tmp = TempDir::new().unwrap();
        let app = test_router(&tmp, false);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let tmp = TempDir::new().unwrap();
        let app = test_router(&tmp, false);
        let req = Request::builder()
            .uri("/api/migrations")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let jobs: Vec<serde_json::Value> = serde_json::from_slice(&bytes).unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let tmp = TempDir::new().unwrap();
        let app = test_router(&tmp, false);
        let req = Request::builder()
            .uri("/api/nothing-here")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_permissive_cors_in_dev_mode() {
        let tmp = TempDir::new().unwrap();
        let app = test_router(&tmp, true);
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_no_cors_headers_by_default() {
        let tmp = TempDir::new().unwrap();
        let app = test_router(&tmp, false);
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(!resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
