use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use super::extractors::REQUEST_ID_HEADER;
use super::handlers;
use crate::observability::{get_metrics, HealthChecker, LatencyTimer};
use crate::services::{BookingLifecycleService, SettlementCoordinator};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SettlementCoordinator>,
    pub lifecycle: Arc<BookingLifecycleService>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<SettlementCoordinator>,
        lifecycle: Arc<BookingLifecycleService>,
        health_checker: Arc<HealthChecker>,
    ) -> Self {
        Self {
            coordinator,
            lifecycle,
            health_checker,
            metrics_handle: None,
        }
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

async fn track_http_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        // Settlement endpoints
        .route("/invoices/settle", post(handlers::settle_invoice))
        // Booking endpoints
        .route("/driver/bookings/status", post(handlers::update_driver_status))
        .route("/bookings/:id/history", get(handlers::get_booking_history))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(middleware::from_fn(track_http_metrics))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}
