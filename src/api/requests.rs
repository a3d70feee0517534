use std::borrow::Cow;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::AppError;
use crate::repositories::InvoiceLookup;
use crate::services::{PaymentMethodChoice, SettlementRequest};

fn validation_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(validation_error("positive", "amount must be greater than zero"))
    }
}

fn validate_settle_request(request: &SettleInvoiceRequest) -> Result<(), ValidationError> {
    if request.invoice_id.is_none() && request.invoice_number.is_none() && request.quote_id.is_none() {
        return Err(validation_error(
            "invoice_reference",
            "one of invoice_id, invoice_number or quote_id is required",
        ));
    }
    match (&request.payment_method_id, request.original_payment_method_id) {
        (None, None) => Err(validation_error(
            "payment_method",
            "payment_method_id or original_payment_method_id is required",
        )),
        (Some(_), Some(_)) => Err(validation_error(
            "payment_method",
            "payment_method_id and original_payment_method_id are mutually exclusive",
        )),
        _ => Ok(()),
    }
}

/// Body of `POST /invoices/settle`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_settle_request", skip_on_field_errors = false))]
pub struct SettleInvoiceRequest {
    #[validate(range(min = 1))]
    pub invoice_id: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub invoice_number: Option<String>,
    #[validate(range(min = 1))]
    pub quote_id: Option<i64>,
    #[validate(custom = "validate_positive_amount")]
    pub amount: Decimal,
    /// Freshly entered gateway payment method token.
    #[validate(length(min = 1, max = 255))]
    pub payment_method_id: Option<String>,
    /// Local id of a previously saved payment method.
    #[validate(range(min = 1))]
    pub original_payment_method_id: Option<i64>,
    #[serde(default)]
    pub save_payment_method: bool,
    pub attempt: Option<u32>,
    /// Intent id from a `requires_action` response, sent once step-up is complete.
    #[validate(length(min = 1, max = 255))]
    pub payment_intent_id: Option<String>,
}

impl SettleInvoiceRequest {
    /// Converts a validated body into the service request. Lookup precedence is invoice id,
    /// then invoice number, then quote id.
    pub fn into_settlement_request(self) -> Result<SettlementRequest, AppError> {
        let lookup = if let Some(id) = self.invoice_id {
            InvoiceLookup::Id(id)
        } else if let Some(number) = self.invoice_number {
            InvoiceLookup::Number(number.trim().to_string())
        } else if let Some(quote_id) = self.quote_id {
            InvoiceLookup::Quote(quote_id)
        } else {
            return Err(AppError::Validation(
                "An invoice reference is required".to_string(),
            ));
        };

        let payment_method = match (self.original_payment_method_id, self.payment_method_id) {
            (Some(saved), None) => PaymentMethodChoice::Saved(saved),
            (None, Some(token)) => PaymentMethodChoice::Fresh(token),
            _ => {
                return Err(AppError::Validation(
                    "Exactly one payment method must be provided".to_string(),
                ))
            }
        };

        Ok(SettlementRequest {
            lookup,
            amount: self.amount,
            payment_method,
            save_payment_method: self.save_payment_method,
            attempt: self.attempt,
            payment_intent_id: self
                .payment_intent_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        })
    }
}

/// Body of `POST /driver/bookings/status`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DriverStatusRequest {
    #[validate(range(min = 1))]
    pub booking_id: i64,
    #[validate(length(min = 1, max = 32))]
    pub new_status: String,
    #[validate(length(min = 1, max = 512))]
    pub token: String,
}

/// Field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Flattens validator errors into field/message pairs; struct-level errors use `request`.
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut flattened: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = if field == "__all__" { "request" } else { field };
            errs.iter().map(move |e| FieldError {
                field: field.to_string(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid value ({})", e.code)),
            })
        })
        .collect();
    flattened.sort_by(|a, b| a.field.cmp(&b.field));
    flattened
}
