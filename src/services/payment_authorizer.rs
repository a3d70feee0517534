use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::gateway::{
    AuthorizationRequest, IntentStatus, PaymentGateway, PaymentIntent, PaymentMethodDetails,
};
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};

/// Normalized result of a create-and-confirm call or of a step-up follow-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Succeeded {
        transaction_id: String,
        payment_method_label: String,
        /// Card details of the charged method, used when saving it.
        payment_method: Option<PaymentMethodDetails>,
    },
    /// Customer step-up (e.g. 3-D Secure) is needed. The client continues it with the secret
    /// and then follows up with the intent id.
    RequiresAdditionalAuthentication {
        intent_id: String,
        client_secret: String,
    },
    /// Accepted by the gateway but not settled yet. Money may still move.
    Pending {
        intent_id: String,
        payment_method_label: String,
    },
    Declined { reason: String },
}

/// What to charge and with which instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount_minor: i64,
    pub customer_id: String,
    pub payment_method: String,
    /// A saved method is charged off-session.
    pub saved_method_used: bool,
    pub save_for_future: bool,
    pub idempotency_key: String,
    pub invoice_number: String,
}

/// Converts a major-unit amount to gateway minor units, rounding half away from zero.
/// Amounts that round to zero or below are rejected.
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    let minor = (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("Amount {} is out of range", amount)))?;

    if minor <= 0 {
        return Err(AppError::Validation(
            "Amount must be greater than zero".to_string(),
        ));
    }
    Ok(minor)
}

/// Wraps the gateway's create-and-confirm call. Never retries.
#[derive(Clone)]
pub struct PaymentAuthorizer {
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl PaymentAuthorizer {
    pub fn new(gateway: Arc<dyn PaymentGateway>, currency: impl Into<String>) -> Self {
        Self {
            gateway,
            currency: currency.into(),
        }
    }

    pub async fn authorize(&self, charge: &ChargeRequest) -> Result<AuthorizationOutcome> {
        if charge.amount_minor <= 0 {
            return Err(AppError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }

        let request = AuthorizationRequest {
            amount_minor: charge.amount_minor,
            currency: self.currency.clone(),
            customer_id: charge.customer_id.clone(),
            payment_method: charge.payment_method.clone(),
            off_session: charge.saved_method_used,
            save_for_future: charge.save_for_future && !charge.saved_method_used,
            idempotency_key: charge.idempotency_key.clone(),
            invoice_number: charge.invoice_number.clone(),
        };

        let timer = LatencyTimer::new();
        let result = self.gateway.create_and_confirm(&request).await;
        get_metrics().record_gateway_call("create_and_confirm", result.is_ok(), timer.elapsed_ms());

        let intent = match result {
            Ok(intent) => intent,
            Err(AppError::GatewayDeclined(reason)) => {
                info!("Authorization for {} declined: {}", charge.invoice_number, reason);
                return Ok(AuthorizationOutcome::Declined { reason });
            }
            Err(e) => {
                warn!(
                    "Authorization for {} with {} failed: {}",
                    charge.invoice_number,
                    mask_sensitive(&charge.payment_method, 4),
                    e
                );
                return Err(e);
            }
        };

        self.normalize(intent, charge).await
    }

    /// Picks up an authorization that earlier required customer step-up. The intent must have
    /// been created for this charge: same invoice, customer, amount and payment method.
    pub async fn resume(&self, intent_id: &str, charge: &ChargeRequest) -> Result<AuthorizationOutcome> {
        let timer = LatencyTimer::new();
        let result = self.gateway.retrieve_payment_intent(intent_id).await;
        get_metrics().record_gateway_call("retrieve_payment_intent", result.is_ok(), timer.elapsed_ms());
        let intent = result?;

        let matches = intent.amount_minor == charge.amount_minor
            && intent.customer_id.as_deref() == Some(charge.customer_id.as_str())
            && intent.invoice_number.as_deref() == Some(charge.invoice_number.as_str())
            && intent
                .payment_method
                .as_ref()
                .map_or(true, |method| method.id == charge.payment_method);
        if !matches {
            warn!(
                "Payment intent {} does not match the charge for {}",
                mask_sensitive(intent_id, 4),
                charge.invoice_number
            );
            return Err(AppError::Validation(format!(
                "Payment intent does not belong to invoice {}",
                charge.invoice_number
            )));
        }

        self.normalize(intent, charge).await
    }

    async fn normalize(&self, intent: PaymentIntent, charge: &ChargeRequest) -> Result<AuthorizationOutcome> {
        match intent.status {
            IntentStatus::Succeeded => {
                let details = self
                    .describe_method(intent.payment_method, &charge.payment_method)
                    .await;
                Ok(AuthorizationOutcome::Succeeded {
                    transaction_id: intent.id,
                    payment_method_label: details.label(),
                    payment_method: Some(details),
                })
            }
            IntentStatus::RequiresAction => {
                let client_secret = intent.client_secret.ok_or_else(|| {
                    AppError::GatewayRejectedRequest(
                        "Authorization requires action but carries no client secret".to_string(),
                    )
                })?;
                Ok(AuthorizationOutcome::RequiresAdditionalAuthentication {
                    intent_id: intent.id,
                    client_secret,
                })
            }
            IntentStatus::RequiresPaymentMethod | IntentStatus::Canceled => {
                Ok(AuthorizationOutcome::Declined {
                    reason: intent
                        .failure_message
                        .unwrap_or_else(|| "Payment was declined".to_string()),
                })
            }
            IntentStatus::Processing | IntentStatus::Other(_) => {
                warn!(
                    "Authorization {} for {} is in unsettled state {:?}",
                    mask_sensitive(&intent.id, 4),
                    charge.invoice_number,
                    intent.status
                );
                let details = self
                    .describe_method(intent.payment_method, &charge.payment_method)
                    .await;
                Ok(AuthorizationOutcome::Pending {
                    intent_id: intent.id,
                    payment_method_label: details.label(),
                })
            }
        }
    }

    /// Card details for the receipt label. Intents that report the method without brand or
    /// last4 are completed with a payment method lookup; a failed lookup keeps what is known.
    async fn describe_method(
        &self,
        reported: Option<PaymentMethodDetails>,
        charged: &str,
    ) -> PaymentMethodDetails {
        let reported = reported.unwrap_or_else(|| PaymentMethodDetails {
            id: charged.to_string(),
            brand: None,
            last4: None,
        });
        if reported.brand.is_some() && reported.last4.is_some() {
            return reported;
        }

        let timer = LatencyTimer::new();
        let fetched = self.gateway.retrieve_payment_method(&reported.id).await;
        get_metrics().record_gateway_call("retrieve_payment_method", fetched.is_ok(), timer.elapsed_ms());

        match fetched {
            Ok(details) => details,
            Err(e) => {
                warn!(
                    "Could not describe payment method {}: {}",
                    mask_sensitive(&reported.id, 4),
                    e
                );
                reported
            }
        }
    }
}
