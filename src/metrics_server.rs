// Metrics server.
//
// A second, unauthenticated HTTP listener serving `/metrics` and `/health`,
// bound to `config.metrics.address` independently of the control interface's
// `bind_address` (spec §6). Kept as its own small axum app rather than folded
// into `http::serve`'s router, matching the original split between this
// listener and the control-plane one.

use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info};

/// Binds `address` and serves `/metrics` + `/health` until `shutdown` resolves.
pub async fn serve(
    address: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .context("binding metrics server listener")?;

    info!(%address, "metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("metrics server error")
}

async fn metrics_handler() -> Response {
    match metrics::gather() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!(error = %e, "failed to gather metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("error gathering metrics: {e}"))
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_and_shuts_down_cleanly() {
        let _ = metrics::init();
        let shutdown = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        let result = serve("127.0.0.1:0", shutdown).await;
        assert!(result.is_ok());
    }
}
