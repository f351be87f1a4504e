use crate::config::Config;
use crate::fleet::PoolManager;
use crate::http::auth::require_basic_auth;
use crate::http::handlers;
use anyhow::{Context, Result};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<dyn PoolManager>,
    pub webhook_secret: Arc<str>,
    pub basic_auth_enabled: bool,
    pub basic_auth_users: Arc<HashMap<String, String>>,
}

const DRAIN_BUDGET: Duration = Duration::from_secs(60);

/// Builds the control interface router. Exposed for in-process integration
/// tests (`tower::ServiceExt::oneshot`); `serve` is the production entry point.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/pools", get(handlers::list_pools))
        .route("/pools/{id}", get(handlers::get_pool))
        .route("/pools/{id}/scale", post(handlers::scale_pool))
        .route("/pools/{id}/pause", post(handlers::pause_pool))
        .route("/pools/{id}/resume", post(handlers::resume_pool))
        .route("/restart", post(handlers::restart))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth));

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/version", get(handlers::version))
        .route("/webhook/github", post(handlers::webhook_github))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the control interface until `shutdown` resolves, then waits up to
/// a 60s drain budget for in-flight requests (spec §5).
pub async fn serve(
    config: &Config,
    fleet: Arc<dyn PoolManager>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let state = AppState {
        fleet,
        webhook_secret: Arc::from(config.github.webhook_secret.as_str()),
        basic_auth_enabled: config.basic_auth_enabled,
        basic_auth_users: Arc::new(config.basic_auth_users.clone()),
    };

    let app = router(state);

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("parsing bind_address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding control interface listener")?;

    info!(%addr, "control interface listening");

    let serve_fut = axum::serve(listener, app).with_graceful_shutdown(shutdown);

    match tokio::time::timeout(DRAIN_BUDGET, serve_fut).await {
        Ok(result) => result.context("control interface error"),
        Err(_) => {
            tracing::warn!("control interface drain budget exceeded, forcing shutdown");
            Ok(())
        }
    }
}
