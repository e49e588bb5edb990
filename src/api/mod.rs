//! HTTP endpoint serving scrapes.
//!
//! Two routes: `GET /metrics` renders the store in the exposition
//! format negotiated from the request's Accept header (gzipped when the
//! scraper accepts it), and `GET /health` reports basic liveness
//! information as JSON.

use crate::core::{ExpositionConfig, Result, SpoutError};
use crate::store::{accepts_gzip, MetricStore, NegotiatedEncoder};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Shared server state.
#[derive(Clone)]
struct ApiState {
    store: Arc<MetricStore>,
    started: Instant,
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    points: usize,
    shards: usize,
}

/// Start the exposition server. Runs until the listener fails.
pub async fn start_server(store: Arc<MetricStore>, config: ExpositionConfig) -> Result<()> {
    let state = ApiState {
        store,
        started: Instant::now(),
    };

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    tracing::info!("serving metrics on http://{}/metrics", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|error| {
            SpoutError::Io(std::io::Error::new(std::io::ErrorKind::Other, error))
        })?;
    Ok(())
}

/// GET /metrics - the store in the negotiated exposition format.
async fn metrics_handler(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    let gzip = accepts_gzip(
        headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|value| value.to_str().ok()),
    );
    let encoder = NegotiatedEncoder::negotiate(accept);

    let mut body = Vec::new();
    if let Err(error) = state.store.render(&mut body, &encoder, gzip) {
        tracing::error!(%error, "failed to render metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "render failed").into_response();
    }

    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        encoder.content_type().parse().expect("valid content type"),
    );
    if gzip {
        response
            .headers_mut()
            .insert(header::CONTENT_ENCODING, "gzip".parse().expect("valid encoding"));
    }
    response
}

/// GET /health - liveness and store statistics.
async fn health_handler(State(state): State<ApiState>) -> Response {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        points: state.store.point_count(),
        shards: state.store.shard_count(),
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StoreConfig;
    use crate::monitoring::InternalMetrics;
    use crate::point::{PointValue, RawMetric};

    fn test_store() -> Arc<MetricStore> {
        let store =
            MetricStore::new(&StoreConfig::default(), Arc::new(InternalMetrics::new())).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_metrics_handler_text() {
        let store = test_store();
        store.insert(RawMetric::new("memory", "rep", PointValue::Gauge(10.0)));
        let state = ApiState {
            store,
            started: Instant::now(),
        };

        let response = metrics_handler(State(state), HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn test_metrics_handler_gzip() {
        let state = ApiState {
            store: test_store(),
            started: Instant::now(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, "gzip".parse().unwrap());
        let response = metrics_handler(State(state), headers).await;
        let encoding = response.headers().get(header::CONTENT_ENCODING).unwrap();
        assert_eq!(encoding.to_str().unwrap(), "gzip");
    }

    #[tokio::test]
    async fn test_metrics_handler_protobuf_accept() {
        let state = ApiState {
            store: test_store(),
            started: Instant::now(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily; encoding=delimited"
                .parse()
                .unwrap(),
        );
        let response = metrics_handler(State(state), headers).await;
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type
            .to_str()
            .unwrap()
            .starts_with("application/vnd.google.protobuf"));
    }

    #[tokio::test]
    async fn test_health_handler() {
        let store = test_store();
        store.insert(RawMetric::new("memory", "rep", PointValue::Gauge(10.0)));
        let state = ApiState {
            store,
            started: Instant::now(),
        };

        let response = health_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
