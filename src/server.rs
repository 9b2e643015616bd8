//! Metrics HTTP endpoint

use std::net::SocketAddr;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::Result;
use crate::metrics;

/// Text exposition of the global metrics registry.
async fn metrics_handler() -> impl IntoResponse {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    match encode(&mut buffer, &metrics::REGISTRY) {
        Ok(()) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            buffer,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {}", e),
        )
            .into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
}

/// Serve the metrics endpoint until the process exits.
pub async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics endpoint listening on {}", addr);
    axum::serve(listener, router())
        .await
        .map_err(crate::Error::IoError)?;
    Ok(())
}
