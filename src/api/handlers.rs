use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::api::extractors::CsrfVerified;
use crate::api::requests::{field_errors, DriverStatusRequest, SettleInvoiceRequest};
use crate::api::responses::{
    status_code, ApiResponse, BookingHistoryResponse, DriverStatusResponse, ErrorResponse,
    HistoryEntryResponse, SettleResponse,
};
use crate::context::RequestContext;
use crate::error::AppError;
use crate::models::current_status;
use crate::observability::AggregatedHealth;

use super::routes::AppState;

/// Health check endpoint.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<AggregatedHealth>>) {
    let health = state.health_checker.check_all().await;
    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(ApiResponse::success(health)))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> (StatusCode, String) {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics are not enabled".to_string()),
    }
}

// ============================================================================
// Settlement Handlers
// ============================================================================

/// Settle an invoice for the calling user.
pub async fn settle_invoice(
    State(state): State<AppState>,
    ctx: RequestContext,
    _csrf: CsrfVerified,
    Json(request): Json<SettleInvoiceRequest>,
) -> (StatusCode, Json<SettleResponse>) {
    if let Err(errors) = request.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(SettleResponse::invalid(&field_errors(&errors))),
        );
    }

    let settlement = match request.into_settlement_request() {
        Ok(settlement) => settlement,
        Err(e) => return (status_code(&e), Json(SettleResponse::failure(&e))),
    };

    match state.coordinator.settle(&ctx, settlement).await {
        Ok(outcome) => (StatusCode::OK, Json(SettleResponse::from(&outcome))),
        Err(e) => {
            let status = status_code(&e);
            if status.is_server_error() {
                tracing::error!("Failed to settle invoice for user {}: {}", ctx.user_id(), e);
            }
            (status, Json(SettleResponse::failure(&e)))
        }
    }
}

// ============================================================================
// Booking Handlers
// ============================================================================

/// Driver-initiated booking status update, authenticated by the driver token in the body.
pub async fn update_driver_status(
    State(state): State<AppState>,
    Json(request): Json<DriverStatusRequest>,
) -> (StatusCode, Json<DriverStatusResponse>) {
    if let Err(errors) = request.validate() {
        let message = field_errors(&errors)
            .into_iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        return (
            StatusCode::BAD_REQUEST,
            Json(DriverStatusResponse {
                success: false,
                message,
                ..Default::default()
            }),
        );
    }

    match state
        .lifecycle
        .update_status_as_driver(&request.token, request.booking_id, &request.new_status)
        .await
    {
        Ok(booking) => (StatusCode::OK, Json(DriverStatusResponse::updated(&booking))),
        Err(e) => {
            let status = status_code(&e);
            if status.is_server_error() {
                tracing::error!("Failed to update booking {}: {}", request.booking_id, e);
            }
            (status, Json(DriverStatusResponse::failure(&e)))
        }
    }
}

/// Status history of one of the caller's bookings.
pub async fn get_booking_history(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<BookingHistoryResponse>>, AppError> {
    let history = state.lifecycle.status_history(ctx.user_id(), id).await?;
    let current = current_status(&history).map(|h| h.status.clone());

    Ok(Json(ApiResponse::success(BookingHistoryResponse {
        booking_id: id,
        current_status: current,
        entries: history.into_iter().map(HistoryEntryResponse::from).collect(),
    })))
}

/// Fallback for unknown routes.
pub async fn not_found() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            ErrorResponse::new("NOT_FOUND", "Route not found"),
        )),
    )
}
