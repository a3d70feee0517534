use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{AppError, Result};
use crate::gateway::IntentStatus;
use crate::models::{DiscrepancyStatus, SettlementDiscrepancy};
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};

use super::settlement_coordinator::{PendingCommit, SettlementCoordinator};

/// Totals for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub examined: usize,
    pub committed: usize,
    pub no_charge: usize,
    pub still_open: usize,
}

/// Resolves open settlement discrepancies against the gateway.
///
/// Charges that really happened get their local commit retried; authorizations that never
/// completed are closed as no-charge. Nothing is ever refunded automatically.
pub struct ReconciliationService {
    coordinator: Arc<SettlementCoordinator>,
}

impl ReconciliationService {
    pub fn new(coordinator: Arc<SettlementCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Examines up to `limit` open discrepancies.
    pub async fn run_once(&self, limit: i64) -> Result<ReconciliationReport> {
        let store = self.coordinator.store();
        let mut uow = store.begin().await?;
        let open = uow.list_open_discrepancies(limit).await?;
        uow.rollback().await?;

        let mut report = ReconciliationReport {
            examined: open.len(),
            ..Default::default()
        };

        for discrepancy in &open {
            let status = match self.reconcile(discrepancy).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Reconciliation of discrepancy {} failed: {}", discrepancy.id, e);
                    DiscrepancyStatus::Open
                }
            };

            if let Err(e) = self.record_attempt(discrepancy.id, status).await {
                error!(
                    "Could not record reconciliation attempt for discrepancy {}: {}",
                    discrepancy.id, e
                );
            }

            match status {
                DiscrepancyStatus::ResolvedCommitted => report.committed += 1,
                DiscrepancyStatus::ResolvedNoCharge => report.no_charge += 1,
                DiscrepancyStatus::Open => report.still_open += 1,
            }
            get_metrics().record_reconciliation(match status {
                DiscrepancyStatus::ResolvedCommitted => "committed",
                DiscrepancyStatus::ResolvedNoCharge => "no_charge",
                DiscrepancyStatus::Open => "still_open",
            });
        }

        get_metrics().set_open_discrepancies(report.still_open);
        if report.examined > 0 {
            info!(
                "Reconciliation pass: {} examined, {} committed, {} no charge, {} still open",
                report.examined, report.committed, report.no_charge, report.still_open
            );
        }
        Ok(report)
    }

    async fn reconcile(&self, discrepancy: &SettlementDiscrepancy) -> Result<DiscrepancyStatus> {
        let gateway = self.coordinator.gateway();
        let timer = LatencyTimer::new();
        let intent = gateway.retrieve_payment_intent(&discrepancy.transaction_id).await;
        get_metrics().record_gateway_call("retrieve_payment_intent", intent.is_ok(), timer.elapsed_ms());
        let intent = intent?;

        match intent.status {
            IntentStatus::Succeeded => {}
            IntentStatus::Processing => return Ok(DiscrepancyStatus::Open),
            IntentStatus::RequiresAction
            | IntentStatus::RequiresPaymentMethod
            | IntentStatus::Canceled
            | IntentStatus::Other(_) => {
                info!(
                    "Authorization {} for invoice {} never completed; closing discrepancy {}",
                    mask_sensitive(&discrepancy.transaction_id, 4),
                    discrepancy.invoice_id,
                    discrepancy.id
                );
                return Ok(DiscrepancyStatus::ResolvedNoCharge);
            }
        }

        let store = self.coordinator.store();
        let mut uow = store.begin().await?;
        let invoice = uow.find_invoice(discrepancy.invoice_id).await?;
        uow.rollback().await?;

        let Some(invoice) = invoice else {
            error!(
                "Invoice {} for charge {} no longer exists; needs manual review",
                discrepancy.invoice_id,
                mask_sensitive(&discrepancy.transaction_id, 4)
            );
            return Ok(DiscrepancyStatus::Open);
        };

        if invoice.transaction_id.as_deref() == Some(discrepancy.transaction_id.as_str()) {
            return Ok(DiscrepancyStatus::ResolvedCommitted);
        }
        if !invoice.is_payable() {
            error!(
                "Invoice {} was settled by another charge; charge {} needs manual review",
                invoice.invoice_number,
                mask_sensitive(&discrepancy.transaction_id, 4)
            );
            return Ok(DiscrepancyStatus::Open);
        }

        let pending = PendingCommit {
            invoice_id: invoice.id,
            user_id: discrepancy.user_id,
            category: invoice.effective_category(),
            transaction_id: discrepancy.transaction_id.clone(),
            payment_method_label: discrepancy.payment_method_label.clone(),
            amount: discrepancy.amount,
            new_method: None,
        };

        match self.coordinator.commit_settlement(&pending, None).await {
            Ok(_) => Ok(DiscrepancyStatus::ResolvedCommitted),
            Err(AppError::NotFoundOrNotPayable) => Ok(DiscrepancyStatus::ResolvedCommitted),
            Err(e) => {
                warn!(
                    "Retrying commit for invoice {} failed again: {}",
                    invoice.invoice_number, e
                );
                Ok(DiscrepancyStatus::Open)
            }
        }
    }

    async fn record_attempt(&self, discrepancy_id: i64, status: DiscrepancyStatus) -> Result<()> {
        let store = self.coordinator.store();
        let mut uow = store.begin().await?;
        uow.record_discrepancy_attempt(discrepancy_id, status).await?;
        uow.commit().await
    }
}

/// Runs reconciliation passes on a fixed interval in the background.
pub struct ReconciliationScheduler {
    service: Arc<ReconciliationService>,
    running: Arc<AtomicBool>,
    interval_seconds: u64,
    batch_size: i64,
}

impl ReconciliationScheduler {
    pub fn new(service: Arc<ReconciliationService>, interval_seconds: u64, batch_size: i64) -> Self {
        Self {
            service,
            running: Arc::new(AtomicBool::new(false)),
            interval_seconds,
            batch_size,
        }
    }

    /// Starts the scheduler in a background task.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let service = self.service.clone();
        let running = self.running.clone();
        let interval = self.interval_seconds;
        let batch_size = self.batch_size;

        running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if let Err(e) = service.run_once(batch_size).await {
                    error!("Reconciliation scheduler error: {}", e);
                }

                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
