use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    AuthorizationRequest, IntentStatus, NewCustomer, PaymentGateway, PaymentIntent,
    PaymentMethodDetails,
};
use crate::config::GatewaySettings;
use crate::error::{AppError, Result};
use crate::observability::mask_sensitive;

/// Stripe-compatible REST client.
#[derive(Clone)]
pub struct StripeGateway {
    http: Client,
    base_url: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(settings: &GatewaySettings) -> Result<Self> {
        let timeout_ms = if settings.timeout_ms > 0 {
            settings.timeout_ms
        } else {
            15_000
        };
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            secret_key: settings.secret_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport_error)?;

        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| {
            AppError::GatewayUnavailable(format!("Malformed gateway response: {}", e))
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<String> {
        let user_id = customer.user_id.to_string();
        let params = [
            ("email", customer.email.as_str()),
            ("name", customer.name.as_str()),
            ("metadata[user_id]", user_id.as_str()),
        ];

        let created: StripeCustomer = self
            .send(self.http.post(self.url("customers")).form(&params))
            .await?;

        debug!(
            "Created gateway customer {} for user {}",
            mask_sensitive(&created.id, 4),
            customer.user_id
        );
        Ok(created.id)
    }

    async fn create_and_confirm(&self, request: &AuthorizationRequest) -> Result<PaymentIntent> {
        let amount = request.amount_minor.to_string();
        let mut params = vec![
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("customer", request.customer_id.as_str()),
            ("payment_method", request.payment_method.as_str()),
            ("confirm", "true"),
            ("payment_method_types[]", "card"),
            ("metadata[invoice_number]", request.invoice_number.as_str()),
            ("expand[]", "payment_method"),
        ];
        if request.off_session {
            params.push(("off_session", "true"));
        } else if request.save_for_future {
            params.push(("setup_future_usage", "off_session"));
        }

        let intent: StripeIntent = self
            .send(
                self.http
                    .post(self.url("payment_intents"))
                    .header("Idempotency-Key", request.idempotency_key.as_str())
                    .form(&params),
            )
            .await?;

        Ok(intent.into_intent())
    }

    async fn retrieve_payment_method(&self, method_id: &str) -> Result<PaymentMethodDetails> {
        let method: StripePaymentMethod = self
            .send(self.http.get(self.url(&format!("payment_methods/{}", method_id))))
            .await?;

        Ok(method.into_details())
    }

    async fn attach_payment_method(&self, method_id: &str, customer_id: &str) -> Result<()> {
        let _: StripePaymentMethod = self
            .send(
                self.http
                    .post(self.url(&format!("payment_methods/{}/attach", method_id)))
                    .form(&[("customer", customer_id)]),
            )
            .await?;

        Ok(())
    }

    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        let intent: StripeIntent = self
            .send(
                self.http
                    .get(self.url(&format!("payment_intents/{}", intent_id)))
                    .query(&[("expand[]", "payment_method")]),
            )
            .await?;

        Ok(intent.into_intent())
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        warn!("Payment gateway request timed out");
        AppError::GatewayUnavailable("Gateway request timed out".to_string())
    } else {
        warn!("Payment gateway transport error: {}", err);
        AppError::GatewayUnavailable(err.to_string())
    }
}

/// Maps a non-2xx gateway response onto the error taxonomy.
fn status_error(status: u16, body: &[u8]) -> AppError {
    let detail = serde_json::from_slice::<StripeErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);
    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| format!("Gateway responded with HTTP {}", status));
    let is_card_error = detail
        .as_ref()
        .and_then(|d| d.kind.as_deref())
        .map(|kind| kind == "card_error")
        .unwrap_or(false);

    match status {
        402 => AppError::GatewayDeclined(message),
        400 if is_card_error => AppError::GatewayDeclined(message),
        429 => AppError::GatewayRateLimited(message),
        400..=499 => AppError::GatewayRejectedRequest(message),
        _ => AppError::GatewayUnavailable(message),
    }
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeCard {
    brand: Option<String>,
    last4: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentMethod {
    id: String,
    card: Option<StripeCard>,
}

impl StripePaymentMethod {
    fn into_details(self) -> PaymentMethodDetails {
        let (brand, last4) = match self.card {
            Some(card) => (card.brand, card.last4),
            None => (None, None),
        };
        PaymentMethodDetails {
            id: self.id,
            brand,
            last4,
        }
    }
}

/// `payment_method` is an id unless the request expanded it.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PaymentMethodField {
    Expanded(StripePaymentMethod),
    Id(String),
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    status: String,
    amount: i64,
    client_secret: Option<String>,
    customer: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    payment_method: Option<PaymentMethodField>,
    last_payment_error: Option<StripeErrorDetail>,
}

impl StripeIntent {
    fn into_intent(mut self) -> PaymentIntent {
        let payment_method = self.payment_method.map(|field| match field {
            PaymentMethodField::Expanded(method) => method.into_details(),
            PaymentMethodField::Id(id) => PaymentMethodDetails {
                id,
                brand: None,
                last4: None,
            },
        });
        PaymentIntent {
            id: self.id,
            status: IntentStatus::from_gateway(&self.status),
            amount_minor: self.amount,
            client_secret: self.client_secret,
            customer_id: self.customer,
            invoice_number: self.metadata.remove("invoice_number"),
            payment_method,
            failure_message: self.last_payment_error.and_then(|e| e.message),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_taxonomy() {
        let card = br#"{"error":{"type":"card_error","message":"Your card was declined."}}"#;
        assert!(matches!(
            status_error(402, card),
            AppError::GatewayDeclined(msg) if msg == "Your card was declined."
        ));
        assert!(matches!(status_error(400, card), AppError::GatewayDeclined(_)));
        assert!(matches!(status_error(429, b""), AppError::GatewayRateLimited(_)));
        assert!(matches!(status_error(401, b""), AppError::GatewayRejectedRequest(_)));
        assert!(matches!(
            status_error(400, br#"{"error":{"type":"invalid_request_error"}}"#),
            AppError::GatewayRejectedRequest(_)
        ));
        assert!(matches!(status_error(503, b"<html>"), AppError::GatewayUnavailable(_)));
    }

    #[test]
    fn test_expanded_intent_parsing() {
        let body = br#"{
            "id": "pi_123",
            "status": "succeeded",
            "amount": 15000,
            "client_secret": "pi_123_secret",
            "customer": "cus_42",
            "metadata": {"invoice_number": "INV-1042"},
            "payment_method": {"id": "pm_1", "card": {"brand": "visa", "last4": "4242"}}
        }"#;
        let intent = serde_json::from_slice::<StripeIntent>(body)
            .unwrap()
            .into_intent();

        assert_eq!(intent.status, IntentStatus::Succeeded);
        assert_eq!(intent.amount_minor, 15000);
        assert_eq!(intent.customer_id.as_deref(), Some("cus_42"));
        assert_eq!(intent.invoice_number.as_deref(), Some("INV-1042"));
        let method = intent.payment_method.unwrap();
        assert_eq!(method.label(), "Visa ending in 4242");
    }

    #[test]
    fn test_unexpanded_intent_parsing() {
        let body = br#"{
            "id": "pi_9",
            "status": "requires_action",
            "amount": 500,
            "client_secret": "pi_9_secret",
            "payment_method": "pm_9",
            "last_payment_error": null
        }"#;
        let intent = serde_json::from_slice::<StripeIntent>(body)
            .unwrap()
            .into_intent();

        assert_eq!(intent.status, IntentStatus::RequiresAction);
        assert!(intent.invoice_number.is_none());
        assert_eq!(intent.payment_method.unwrap().id, "pm_9");
    }
}
