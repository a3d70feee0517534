use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::AppError;
use crate::models::{Booking, BookingStatusHistory};
use crate::services::{SettlementOutcome, SettlementReceipt};

use super::requests::FieldError;

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// HTTP status for each error kind.
pub fn status_code(error: &AppError) -> StatusCode {
    match error {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::NotFoundOrNotPayable | AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
        AppError::GatewayDeclined(_) => StatusCode::PAYMENT_REQUIRED,
        AppError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::GatewayRateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        AppError::GatewayRejectedRequest(_) => StatusCode::BAD_GATEWAY,
        AppError::InternalInconsistency { .. }
        | AppError::Database(_)
        | AppError::Migration(_)
        | AppError::Configuration(_)
        | AppError::Kafka(_)
        | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Message safe to show the caller. Infrastructure details stay in the logs.
pub fn public_message(error: &AppError) -> String {
    match error {
        AppError::GatewayUnavailable(_) => {
            "The payment provider is temporarily unavailable. Please try again.".to_string()
        }
        AppError::GatewayRateLimited(_) => {
            "Too many payment attempts. Please wait and try again.".to_string()
        }
        AppError::GatewayRejectedRequest(_) => {
            "The payment could not be processed. Please contact support.".to_string()
        }
        AppError::InternalInconsistency { .. } => {
            "Your payment was received but could not be finalized. Our team has been notified."
                .to_string()
        }
        AppError::Database(_)
        | AppError::Migration(_)
        | AppError::Configuration(_)
        | AppError::Kafka(_)
        | AppError::Internal(_) => "An internal error occurred".to_string(),
        other => other.to_string(),
    }
}

fn log_server_error(error: &AppError) {
    if status_code(error).is_server_error() {
        error!("Request failed: {}", error);
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        log_server_error(&self);
        let status = status_code(&self);
        let body = ApiResponse::<()>::error(ErrorResponse::new(self.code(), public_message(&self)));
        (status, Json(body)).into_response()
    }
}

/// Body of `POST /invoices/settle` for every outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_action: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
}

impl SettleResponse {
    pub fn settled(receipt: &SettlementReceipt) -> Self {
        Self {
            success: true,
            message: Some(format!(
                "Invoice {} paid with {}",
                receipt.invoice_number, receipt.payment_method
            )),
            transaction_id: Some(receipt.transaction_id.clone()),
            booking_id: receipt.booking_id,
            ..Default::default()
        }
    }

    pub fn requires_action(payment_intent_id: String, client_secret: String) -> Self {
        Self {
            success: false,
            requires_action: Some(true),
            payment_intent_client_secret: Some(client_secret),
            payment_intent_id: Some(payment_intent_id),
            ..Default::default()
        }
    }

    pub fn failure(error: &AppError) -> Self {
        Self {
            success: false,
            message: Some(public_message(error)),
            code: Some(error.code().to_string()),
            ..Default::default()
        }
    }

    pub fn invalid(details: &[FieldError]) -> Self {
        let message = details
            .iter()
            .map(|d| format!("{}: {}", d.field, d.message))
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            success: false,
            message: Some(message),
            code: Some("VALIDATION_ERROR".to_string()),
            ..Default::default()
        }
    }
}

impl From<&SettlementOutcome> for SettleResponse {
    fn from(outcome: &SettlementOutcome) -> Self {
        match outcome {
            SettlementOutcome::Settled(receipt) => Self::settled(receipt),
            SettlementOutcome::RequiresAction {
                payment_intent_id,
                client_secret,
            } => Self::requires_action(payment_intent_id.clone(), client_secret.clone()),
        }
    }
}

/// Body of `POST /driver/bookings/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverStatusResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl DriverStatusResponse {
    pub fn updated(booking: &Booking) -> Self {
        Self {
            success: true,
            message: format!("Booking {} is now {}", booking.booking_number, booking.status),
            booking_id: Some(booking.id),
            status: Some(booking.status.to_string()),
        }
    }

    pub fn failure(error: &AppError) -> Self {
        Self {
            success: false,
            message: public_message(error),
            ..Default::default()
        }
    }
}

/// Status history entry response DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntryResponse {
    pub status: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<BookingStatusHistory> for HistoryEntryResponse {
    fn from(entry: BookingStatusHistory) -> Self {
        Self {
            status: entry.status,
            note: entry.note,
            created_at: entry.created_at,
        }
    }
}

/// Booking history with the derived display status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingHistoryResponse {
    pub booking_id: i64,
    pub current_status: Option<String>,
    pub entries: Vec<HistoryEntryResponse>,
}
