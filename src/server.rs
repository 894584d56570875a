//! Demo HTTP server.
//!
//! Provides:
//! - `/health` - Basic health check
//! - `/ready` - Readiness check
//! - `/status/:code` - Responds with the given status code
//! - `/work` - Does a little traced work
//!
//! Every route is wrapped in the request metrics layer.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Extension, Router,
};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, KeyValue};
use tokio::sync::watch;

use crate::config::Config;
use crate::middleware::StatusLatch;
use crate::observability::trace::SpanOptions;
use crate::telemetry::Telemetry;

/// Create the demo router, instrumented with `telemetry`.
pub fn build_router(telemetry: Telemetry) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status/:code", get(status_handler))
        .route("/work", get(work_handler))
        .layer(telemetry.http_layer())
        .with_state(telemetry)
}

/// Handle GET /health - Basic health check.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Handle GET /ready - Readiness check.
async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "READY")
}

/// Handle GET /status/:code - Commit the requested status.
async fn status_handler(
    Path(code): Path<u16>,
    Extension(latch): Extension<StatusLatch>,
) -> impl IntoResponse {
    match StatusCode::from_u16(code) {
        Ok(status) => {
            latch.commit(status);
            (status, status.to_string())
        }
        Err(_) => (StatusCode::BAD_REQUEST, format!("invalid status code: {code}")),
    }
}

/// Handle GET /work - Run a short unit of work under a span.
async fn work_handler(State(telemetry): State<Telemetry>) -> impl IntoResponse {
    let cx = telemetry.start_span_with(
        &Context::current(),
        SpanOptions::named("work").with_attributes([KeyValue::new("work.units", 3_i64)]),
    );

    for unit in 0..3 {
        let step = telemetry.start_span(&cx);
        tracing::debug!(unit, "Processing work unit");
        tokio::time::sleep(Duration::from_millis(5)).await;
        step.span().end();
    }

    cx.span().end();
    (StatusCode::OK, "done")
}

/// Run the demo HTTP server.
///
/// # Arguments
///
/// * `config` - Server configuration
/// * `telemetry` - Telemetry context used to instrument the routes
/// * `shutdown_rx` - Receiver for shutdown signal
///
/// # Returns
///
/// Returns when the server has shut down.
pub async fn run_server(
    config: &Config,
    telemetry: Telemetry,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app = build_router(telemetry);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Starting Beacon HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, stopping server");
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
