use std::{io, net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::{Registry, TextEncoder};
use thiserror::Error;
use tokio::{net::TcpListener, time::Duration};
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// As defined by Prometheus:
/// https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#basic-info
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Possible errors from the [`self`] module.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Failed to listen on '{0}': {1}")]
    Bind(SocketAddr, #[source] io::Error),

    #[error("HTTP server failed: {0}")]
    Serve(#[source] io::Error),
}

pub type HttpResult<T> = Result<T, HttpError>;

#[derive(Clone)]
struct HttpServiceState {
    metrics: Arc<Registry>,
}

/// Binds the listening socket.
///
/// Done separately from [`serve`], so that failing to listen is reported before anything
/// else starts.
pub async fn bind(listen_on: SocketAddr) -> HttpResult<TcpListener> {
    TcpListener::bind(listen_on).await.map_err(|e| HttpError::Bind(listen_on, e))
}

/// Serves the content of the `metrics` [`Registry`] at `telemetry_path`,
/// until `shutdown_token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    telemetry_path: &str,
    metrics: Arc<Registry>,
    shutdown_token: CancellationToken,
) -> HttpResult<()> {
    let app = router(telemetry_path, metrics);

    match listener.local_addr() {
        Ok(addr) => info!("Begin listening on '{addr}', exposing metrics at '{telemetry_path}'..."),
        Err(e) => warn!("Begin listening on unknown address: {e}"),
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .await
        .map_err(HttpError::Serve)
}

fn router(telemetry_path: &str, metrics: Arc<Registry>) -> Router {
    let state = HttpServiceState {
        metrics,
    };

    Router::new()
        .route(telemetry_path, get(prometheus_metrics))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

async fn prometheus_metrics(State(state): State<HttpServiceState>) -> impl IntoResponse {
    let mut status = StatusCode::OK;
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EXPOSITION_CONTENT_TYPE));

    let mut body = String::new();
    let metrics_family = state.metrics.gather();
    if let Err(e) = TextEncoder.encode_utf8(&metrics_family, &mut body) {
        error!("Failed to encode metrics: {e}");
        status = StatusCode::INTERNAL_SERVER_ERROR;
        body = format!("Failed to encode metrics: {e}");
    }

    (status, headers, body)
}
