//! Payment gateway port and its implementations.
//!
//! The engine only needs create-and-confirm authorization, customer creation, payment method
//! retrieve/attach and authorization lookup. Gateway failures are reported with the
//! `AppError::Gateway*` variants so callers can tell a decline from an outage.

pub mod fake;
pub mod stripe;

pub use fake::{FakeGateway, FakeOutcome};
pub use stripe::StripeGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::payment_method_label;

/// Customer details sent when creating a gateway customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub user_id: i64,
    pub email: String,
    pub name: String,
}

/// A create-and-confirm authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub customer_id: String,
    pub payment_method: String,
    /// Charge a saved instrument without the customer present.
    pub off_session: bool,
    /// Ask the gateway to keep the instrument usable for future off-session charges.
    pub save_for_future: bool,
    pub idempotency_key: String,
    pub invoice_number: String,
}

/// Gateway-side state of an authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    Succeeded,
    RequiresAction,
    RequiresPaymentMethod,
    Processing,
    Canceled,
    Other(String),
}

impl IntentStatus {
    pub fn from_gateway(status: &str) -> Self {
        match status {
            "succeeded" => IntentStatus::Succeeded,
            "requires_action" | "requires_confirmation" => IntentStatus::RequiresAction,
            "requires_payment_method" => IntentStatus::RequiresPaymentMethod,
            "processing" => IntentStatus::Processing,
            "canceled" => IntentStatus::Canceled,
            other => IntentStatus::Other(other.to_string()),
        }
    }
}

/// Card details of a tokenized payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodDetails {
    pub id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
}

impl PaymentMethodDetails {
    pub fn label(&self) -> String {
        payment_method_label(self.brand.as_deref(), self.last4.as_deref())
    }
}

/// An authorization as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub amount_minor: i64,
    pub client_secret: Option<String>,
    pub customer_id: Option<String>,
    /// Invoice number stored in the intent's metadata at creation.
    pub invoice_number: Option<String>,
    pub payment_method: Option<PaymentMethodDetails>,
    /// Gateway explanation of the last failure, if any.
    pub failure_message: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a customer and returns the gateway customer id.
    async fn create_customer(&self, customer: &NewCustomer) -> Result<String>;

    /// Creates and immediately confirms an authorization.
    async fn create_and_confirm(&self, request: &AuthorizationRequest) -> Result<PaymentIntent>;

    /// Card details for a method whose intent did not carry them.
    async fn retrieve_payment_method(&self, method_id: &str) -> Result<PaymentMethodDetails>;

    async fn attach_payment_method(&self, method_id: &str, customer_id: &str) -> Result<()>;

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_status_mapping() {
        assert_eq!(IntentStatus::from_gateway("succeeded"), IntentStatus::Succeeded);
        assert_eq!(
            IntentStatus::from_gateway("requires_action"),
            IntentStatus::RequiresAction
        );
        assert_eq!(
            IntentStatus::from_gateway("requires_payment_method"),
            IntentStatus::RequiresPaymentMethod
        );
        assert_eq!(
            IntentStatus::from_gateway("requires_capture"),
            IntentStatus::Other("requires_capture".to_string())
        );
    }
}
