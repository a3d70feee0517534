use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::RequestContext;
use crate::error::{AppError, Result};
use crate::events::{
    publish_detached, BookingStatusEvent, DomainEvent, EventPublisher, SettlementEvent,
};
use crate::gateway::{PaymentGateway, PaymentMethodDetails};
use crate::idempotency::{ChargeAttempt, IdempotencyKeyGenerator};
use crate::models::{
    Invoice, InvoiceCategory, NewDiscrepancy, NewPaymentMethod, SettlementDiscrepancy,
};
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};
use crate::repositories::{InvoiceLookup, SettlementStore};

use super::billing_profile_service::BillingProfileService;
use super::invoice_resolver::InvoiceResolver;
use super::payment_authorizer::{
    to_minor_units, AuthorizationOutcome, ChargeRequest, PaymentAuthorizer,
};
use super::side_effects::{SideEffectDispatcher, SideEffectOutcome};

/// Instrument to charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentMethodChoice {
    /// Freshly entered gateway payment method token.
    Fresh(String),
    /// Local id of a payment method the caller saved earlier.
    Saved(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRequest {
    pub lookup: InvoiceLookup,
    pub amount: Decimal,
    pub payment_method: PaymentMethodChoice,
    pub save_payment_method: bool,
    /// Bump to start a new gateway authorization instead of replaying the previous one.
    pub attempt: Option<u32>,
    /// Intent returned with `RequiresAction`. Set once the customer has completed step-up so the
    /// existing authorization is committed instead of a new one being created.
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementReceipt {
    pub invoice_id: i64,
    pub invoice_number: String,
    pub transaction_id: String,
    pub payment_method: String,
    pub booking_id: Option<i64>,
    pub category: InvoiceCategory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Settled(SettlementReceipt),
    /// Nothing was persisted. The client completes authentication with the secret, then settles
    /// again with `payment_intent_id`.
    RequiresAction {
        payment_intent_id: String,
        client_secret: String,
    },
}

/// Everything the local commit phase needs once the gateway has taken the money.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommit {
    pub invoice_id: i64,
    pub user_id: i64,
    pub category: InvoiceCategory,
    pub transaction_id: String,
    pub payment_method_label: String,
    pub amount: Decimal,
    pub new_method: Option<NewPaymentMethod>,
}

struct Preflight {
    invoice: Invoice,
    category: InvoiceCategory,
    /// Gateway id of the instrument to charge.
    gateway_method_id: String,
    saved_method_used: bool,
}

/// Settles invoices in two phases: authorize with the gateway outside any local transaction,
/// then commit the invoice and its side effect atomically.
pub struct SettlementCoordinator {
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn EventPublisher>,
    billing: BillingProfileService,
    authorizer: PaymentAuthorizer,
    keys: IdempotencyKeyGenerator,
}

impl SettlementCoordinator {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Arc<dyn EventPublisher>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            billing: BillingProfileService::new(store.clone(), gateway.clone()),
            authorizer: PaymentAuthorizer::new(gateway.clone(), currency),
            keys: IdempotencyKeyGenerator::with_default_config(),
            store,
            gateway,
            publisher,
        }
    }

    pub fn store(&self) -> Arc<dyn SettlementStore> {
        self.store.clone()
    }

    pub fn gateway(&self) -> Arc<dyn PaymentGateway> {
        self.gateway.clone()
    }

    /// Settles one invoice for the calling user.
    pub async fn settle(
        &self,
        ctx: &RequestContext,
        request: SettlementRequest,
    ) -> Result<SettlementOutcome> {
        let timer = LatencyTimer::new();
        let amount_minor = to_minor_units(request.amount)?;

        let preflight = self.preflight(ctx, &request).await?;
        let category = preflight.category;
        let invoice_number = preflight.invoice.invoice_number.clone();

        let customer_id = self.billing.ensure_external_customer(&ctx.user).await?;

        let mut attempt = ChargeAttempt::new(
            preflight.invoice.id,
            preflight.gateway_method_id.as_str(),
            amount_minor,
        );
        if let Some(n) = request.attempt {
            attempt = attempt.with_attempt(n);
        }

        let charge = ChargeRequest {
            amount_minor,
            customer_id: customer_id.clone(),
            payment_method: preflight.gateway_method_id.clone(),
            saved_method_used: preflight.saved_method_used,
            save_for_future: request.save_payment_method,
            idempotency_key: self.keys.charge_key(&attempt),
            invoice_number: invoice_number.clone(),
        };

        let authorized = match &request.payment_intent_id {
            Some(intent_id) => self.authorizer.resume(intent_id, &charge).await,
            None => self.authorizer.authorize(&charge).await,
        };
        let outcome = match authorized {
            Ok(outcome) => outcome,
            Err(e) => {
                get_metrics().record_settlement_outcome(category.as_str(), e.code());
                return Err(e);
            }
        };

        let result = match outcome {
            AuthorizationOutcome::Declined { reason } => {
                get_metrics().record_settlement_outcome(category.as_str(), "declined");
                Err(AppError::GatewayDeclined(reason))
            }
            AuthorizationOutcome::RequiresAdditionalAuthentication {
                intent_id,
                client_secret,
            } => {
                info!("Invoice {} requires additional authentication", invoice_number);
                get_metrics().record_settlement_outcome(category.as_str(), "requires_action");
                Ok(SettlementOutcome::RequiresAction {
                    payment_intent_id: intent_id,
                    client_secret,
                })
            }
            AuthorizationOutcome::Pending {
                intent_id,
                payment_method_label,
            } => {
                let pending = PendingCommit {
                    invoice_id: preflight.invoice.id,
                    user_id: ctx.user_id(),
                    category,
                    transaction_id: intent_id,
                    payment_method_label,
                    amount: request.amount,
                    new_method: None,
                };
                self.track_unsettled_charge(&pending).await;
                get_metrics().record_settlement_outcome(category.as_str(), "pending");
                Err(AppError::GatewayUnavailable(
                    "Authorization has not completed yet".to_string(),
                ))
            }
            AuthorizationOutcome::Succeeded {
                transaction_id,
                payment_method_label,
                payment_method,
            } => {
                let new_method = if request.save_payment_method && !preflight.saved_method_used {
                    self.attach_method(ctx, &preflight.gateway_method_id, &customer_id, payment_method)
                        .await
                } else {
                    None
                };

                let pending = PendingCommit {
                    invoice_id: preflight.invoice.id,
                    user_id: ctx.user_id(),
                    category,
                    transaction_id,
                    payment_method_label,
                    amount: request.amount,
                    new_method,
                };
                match self.commit_settlement(&pending, ctx.request_id.clone()).await {
                    Ok(receipt) => {
                        get_metrics().record_settlement_outcome(category.as_str(), "settled");
                        Ok(SettlementOutcome::Settled(receipt))
                    }
                    Err(e) => {
                        get_metrics().record_settlement_outcome(category.as_str(), e.code());
                        Err(e)
                    }
                }
            }
        };

        get_metrics().record_settlement_latency(category.as_str(), timer.elapsed_ms());
        result
    }

    /// Read-only checks that must pass before any money moves.
    async fn preflight(&self, ctx: &RequestContext, request: &SettlementRequest) -> Result<Preflight> {
        let mut uow = self.store.begin().await?;

        let resolved =
            InvoiceResolver::load_payable_invoice(uow.as_mut(), &request.lookup, ctx.user_id())
                .await?;

        let balance = resolved.invoice.balance_due().round_dp(2);
        if request.amount.round_dp(2) != balance {
            return Err(AppError::Validation(format!(
                "Amount {} does not match the balance due of {}",
                request.amount, balance
            )));
        }

        InvoiceResolver::validate_linkage(uow.as_mut(), &resolved).await?;

        let (gateway_method_id, saved_method_used) = match &request.payment_method {
            PaymentMethodChoice::Fresh(token) => {
                if token.trim().is_empty() {
                    return Err(AppError::Validation(
                        "A payment method is required".to_string(),
                    ));
                }
                (token.trim().to_string(), false)
            }
            PaymentMethodChoice::Saved(method_id) => {
                let method = uow
                    .find_payment_method(ctx.user_id(), *method_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Validation(format!("Payment method {} not found", method_id))
                    })?;
                (method.gateway_method_id, true)
            }
        };

        uow.rollback().await?;

        Ok(Preflight {
            invoice: resolved.invoice,
            category: resolved.category,
            gateway_method_id,
            saved_method_used,
        })
    }

    /// Attaches a freshly entered method to the customer. Failures never undo the charge; the
    /// method is then simply not saved.
    async fn attach_method(
        &self,
        ctx: &RequestContext,
        method_id: &str,
        customer_id: &str,
        details: Option<PaymentMethodDetails>,
    ) -> Option<NewPaymentMethod> {
        let timer = LatencyTimer::new();
        let attached = self.gateway.attach_payment_method(method_id, customer_id).await;
        get_metrics().record_gateway_call("attach_payment_method", attached.is_ok(), timer.elapsed_ms());

        if let Err(e) = attached {
            warn!(
                "Could not attach payment method {} for user {}: {}",
                mask_sensitive(method_id, 4),
                ctx.user_id(),
                e
            );
            return None;
        }

        let (brand, last4) = details
            .map(|d| (d.brand, d.last4))
            .unwrap_or((None, None));
        Some(NewPaymentMethod {
            user_id: ctx.user_id(),
            gateway_method_id: method_id.to_string(),
            brand,
            last4,
            is_default: false,
        })
    }

    /// Local commit phase for an authorization that already succeeded.
    ///
    /// Any failure is escalated: a discrepancy row is recorded in its own transaction and
    /// `InternalInconsistency` is returned. If the invoice turns out to be settled already by
    /// this very transaction, `NotFoundOrNotPayable` is returned instead.
    pub async fn commit_settlement(
        &self,
        pending: &PendingCommit,
        correlation_id: Option<String>,
    ) -> Result<SettlementReceipt> {
        match self.try_commit(pending).await {
            Ok((invoice, effect)) => {
                let booking_id = effect.booking_id();
                info!(
                    "Settled invoice {} with {} ({})",
                    invoice.invoice_number,
                    mask_sensitive(&pending.transaction_id, 4),
                    pending.category.as_str()
                );

                publish_detached(
                    self.publisher.clone(),
                    DomainEvent::settlement(SettlementEvent::from_paid_invoice(
                        &invoice,
                        pending.category,
                        booking_id,
                    ))
                    .with_correlation_id(correlation_id.clone()),
                );
                if let Some((booking, from)) = effect.transition() {
                    publish_detached(
                        self.publisher.clone(),
                        DomainEvent::booking_status(BookingStatusEvent::new(
                            booking,
                            from,
                            "settlement",
                        ))
                        .with_correlation_id(correlation_id),
                    );
                }

                Ok(SettlementReceipt {
                    invoice_id: invoice.id,
                    invoice_number: invoice.invoice_number,
                    transaction_id: pending.transaction_id.clone(),
                    payment_method: pending.payment_method_label.clone(),
                    booking_id,
                    category: pending.category,
                })
            }
            Err(AppError::NotFoundOrNotPayable) => {
                let settled_by = self.settled_transaction(pending.invoice_id).await;
                if settled_by.as_deref() == Some(pending.transaction_id.as_str()) {
                    return Err(AppError::NotFoundOrNotPayable);
                }
                let reason = match settled_by {
                    Some(other) => format!(
                        "invoice already settled by {}; charge needs manual review",
                        mask_sensitive(&other, 4)
                    ),
                    None => "invoice no longer payable; charge needs manual review".to_string(),
                };
                Err(self.record_discrepancy(pending, reason).await)
            }
            Err(e) => Err(self.record_discrepancy(pending, e.to_string()).await),
        }
    }

    async fn try_commit(&self, pending: &PendingCommit) -> Result<(Invoice, SideEffectOutcome)> {
        let mut uow = self.store.begin().await?;

        let resolved =
            InvoiceResolver::lock_payable_invoice(uow.as_mut(), pending.invoice_id, pending.user_id)
                .await?;

        let paid = uow
            .mark_invoice_paid(
                resolved.invoice.id,
                &pending.payment_method_label,
                &pending.transaction_id,
            )
            .await?
            .ok_or(AppError::NotFoundOrNotPayable)?;

        let effect = SideEffectDispatcher::dispatch(uow.as_mut(), &paid, resolved.category).await?;

        if let Some(method) = &pending.new_method {
            uow.insert_payment_method(method).await?;
        }

        uow.commit().await?;
        Ok((paid, effect))
    }

    /// Gateway reference stored on the invoice, if it is paid.
    async fn settled_transaction(&self, invoice_id: i64) -> Option<String> {
        let lookup = async {
            let mut uow = self.store.begin().await?;
            let invoice = uow.find_invoice(invoice_id).await?;
            uow.rollback().await?;
            Ok::<_, AppError>(invoice)
        };
        match lookup.await {
            Ok(invoice) => invoice.and_then(|i| i.transaction_id),
            Err(e) => {
                warn!("Could not re-read invoice {}: {}", invoice_id, e);
                None
            }
        }
    }

    async fn store_discrepancy(
        &self,
        pending: &PendingCommit,
        reason: &str,
    ) -> Result<SettlementDiscrepancy> {
        let discrepancy = NewDiscrepancy {
            invoice_id: pending.invoice_id,
            user_id: pending.user_id,
            transaction_id: pending.transaction_id.clone(),
            payment_method_label: pending.payment_method_label.clone(),
            amount: pending.amount,
            reason: reason.to_string(),
        };

        let mut uow = self.store.begin().await?;
        let row = uow.insert_discrepancy(&discrepancy).await?;
        uow.commit().await?;
        Ok(row)
    }

    /// An authorization the gateway has not settled may still take the money, so it is
    /// tracked for reconciliation like a failed commit.
    async fn track_unsettled_charge(&self, pending: &PendingCommit) {
        match self
            .store_discrepancy(pending, "authorization still processing at the gateway")
            .await
        {
            Ok(row) => warn!(
                "Authorization {} for invoice {} is still processing; tracked as discrepancy {}",
                mask_sensitive(&pending.transaction_id, 4),
                pending.invoice_id,
                row.id
            ),
            Err(e) => error!(
                "Authorization {} for invoice {} is still processing and could not be tracked: {}",
                mask_sensitive(&pending.transaction_id, 4),
                pending.invoice_id,
                e
            ),
        }
    }

    async fn record_discrepancy(&self, pending: &PendingCommit, reason: String) -> AppError {
        match self.store_discrepancy(pending, &reason).await {
            Ok(row) => error!(
                "Charge {} for invoice {} succeeded but the local commit failed (discrepancy {}): {}",
                mask_sensitive(&pending.transaction_id, 4),
                pending.invoice_id,
                row.id,
                reason
            ),
            Err(e) => error!(
                "Charge {} for invoice {} succeeded but the local commit failed ({}); recording the discrepancy also failed: {}",
                mask_sensitive(&pending.transaction_id, 4),
                pending.invoice_id,
                reason,
                e
            ),
        }
        get_metrics().record_internal_inconsistency(pending.category.as_str());

        AppError::InternalInconsistency {
            invoice_id: pending.invoice_id,
            transaction_id: pending.transaction_id.clone(),
            message: reason,
        }
    }
}
