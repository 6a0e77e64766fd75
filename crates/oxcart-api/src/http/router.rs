//! Router construction and server host for the API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::{Method, Request, header::CONTENT_TYPE},
    routing::{get, post},
};
use oxcart_core::ArchiveEngine;
use oxcart_telemetry::{Metrics, build_sha};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::constants::HEADER_REQUEST_ID;
use crate::http::health::{health, metrics};
use crate::http::orchestrations::{
    cancel_orchestration, get_orchestration, list_orchestrations, start_orchestration,
};
use crate::http::telemetry::HttpMetricsLayer;
use crate::state::ApiState;

/// Axum router wrapper that hosts the Oxcart API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Construct the API server over a shared engine and telemetry handle.
    #[must_use]
    pub fn new(engine: Arc<ArchiveEngine>, telemetry: Metrics) -> Self {
        let state = Arc::new(ApiState::new(engine, telemetry.clone()));

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE]);
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    method = %request.method(),
                    route = %request.uri().path(),
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    span.record("status_code", response.status().as_u16());
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(oxcart_telemetry::propagate_request_id_layer())
            .layer(oxcart_telemetry::set_request_id_layer())
            .layer(trace_layer)
            .layer(HttpMetricsLayer::new(telemetry));

        let router = Self::build_router()
            .layer(cors_layer)
            .route_layer(layered)
            .with_state(state);

        Self { router }
    }

    fn build_router() -> Router<Arc<ApiState>> {
        Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .route(
                "/orchestrations",
                get(list_orchestrations).post(start_orchestration),
            )
            .route("/orchestrations/{id}", get(get_orchestration))
            .route("/orchestrations/{id}/cancel", post(cancel_orchestration))
    }

    /// Serve the API on the supplied address until the server terminates.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server
    /// terminates unexpectedly.
    pub async fn serve(self, addr: SocketAddr) -> ApiServerResult<()> {
        tracing::info!(%addr, "starting api server");
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        axum::serve(listener, self.router.into_make_service())
            .await
            .map_err(|source| ApiServerError::Serve { source })
    }
}
