use std::sync::Arc;

use tracing::{info, warn};

use crate::context::UserIdentity;
use crate::error::Result;
use crate::gateway::{NewCustomer, PaymentGateway};
use crate::observability::{get_metrics, mask_sensitive, LatencyTimer};
use crate::repositories::SettlementStore;

/// Maps local users to gateway customers, creating them on first use.
#[derive(Clone)]
pub struct BillingProfileService {
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl BillingProfileService {
    pub fn new(store: Arc<dyn SettlementStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Returns the user's gateway customer id.
    ///
    /// No transaction is held across the gateway call. Concurrent first use may create two
    /// gateway customers, but the upsert keeps exactly one mapping and both callers use it.
    pub async fn ensure_external_customer(&self, user: &UserIdentity) -> Result<String> {
        let mut uow = self.store.begin().await?;
        let existing = uow.find_billing_profile(user.id).await?;
        uow.rollback().await?;

        if let Some(profile) = existing {
            return Ok(profile.external_customer_id);
        }

        let timer = LatencyTimer::new();
        let created = self
            .gateway
            .create_customer(&NewCustomer {
                user_id: user.id,
                email: user.email.clone(),
                name: user.name.clone(),
            })
            .await;
        get_metrics().record_gateway_call("create_customer", created.is_ok(), timer.elapsed_ms());
        let created = created?;

        let mut uow = self.store.begin().await?;
        let profile = uow.upsert_billing_profile(user.id, &created).await?;
        uow.commit().await?;

        if profile.external_customer_id != created {
            warn!(
                "Concurrent customer creation for user {}; keeping {} and orphaning {}",
                user.id,
                mask_sensitive(&profile.external_customer_id, 4),
                mask_sensitive(&created, 4)
            );
        } else {
            info!("Created billing profile for user {}", user.id);
        }

        Ok(profile.external_customer_id)
    }
}
