//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::Driver;
use crate::{Error, Result};

use super::handlers;

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
async fn metrics_handler() -> std::result::Result<String, axum::http::StatusCode> {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

/// Build the API router around a driver
pub fn router(driver: Arc<Driver>) -> Router {
    let app = Router::new().route("/health", get(handlers::health));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.route(
        "/api/v1/instances/{id}",
        get(handlers::get_instance).delete(handlers::delete_instance),
    )
    .route("/api/v1/instances/{id}/start", post(handlers::start_instance))
    .route("/api/v1/instances/{id}/stop", post(handlers::stop_instance))
    .route("/api/v1/instances/{id}/command", post(handlers::send_command))
    .layer(TraceLayer::new_for_http())
    .with_state(driver)
}

/// Run the REST API server until `shutdown` resolves
pub async fn run_server<F>(driver: Arc<Driver>, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(driver);

    info!("REST API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}
