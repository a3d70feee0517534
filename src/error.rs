use thiserror::Error;

/// Errors produced by the settlement engine.
///
/// Each failure category is its own variant so callers can match exhaustively instead of
/// inspecting messages.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The invoice does not exist, belongs to another user, or is no longer payable.
    /// The message never reveals which of these occurred.
    #[error("Invoice not found or not payable")]
    NotFoundOrNotPayable,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid booking status transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Payment declined: {0}")]
    GatewayDeclined(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment gateway rate limited: {0}")]
    GatewayRateLimited(String),

    #[error("Payment gateway rejected request: {0}")]
    GatewayRejectedRequest(String),

    /// The external charge succeeded but local state could not be committed.
    #[error("Internal inconsistency for invoice {invoice_id}: {message}")]
    InternalInconsistency {
        invoice_id: i64,
        transaction_id: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rskafka::client::error::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code used in API responses and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFoundOrNotPayable => "NOT_FOUND_OR_NOT_PAYABLE",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::GatewayDeclined(_) => "PAYMENT_DECLINED",
            AppError::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            AppError::GatewayRateLimited(_) => "GATEWAY_RATE_LIMITED",
            AppError::GatewayRejectedRequest(_) => "GATEWAY_REJECTED_REQUEST",
            AppError::InternalInconsistency { .. } => "INTERNAL_INCONSISTENCY",
            AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Configuration(_)
            | AppError::Kafka(_)
            | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::GatewayUnavailable(_) | AppError::GatewayRateLimited(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
