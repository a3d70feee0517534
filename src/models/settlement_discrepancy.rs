use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// State of a charge whose local commit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "discrepancy_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    /// Money moved externally, local state not yet committed.
    Open,
    /// A later commit attempt succeeded.
    ResolvedCommitted,
    /// The gateway reports the authorization never completed.
    ResolvedNoCharge,
}

/// Outbox row written when the gateway charge succeeded but the local commit did not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SettlementDiscrepancy {
    pub id: i64,
    pub invoice_id: i64,
    pub user_id: i64,
    pub transaction_id: String,
    pub payment_method_label: String,
    pub amount: Decimal,
    pub reason: String,
    pub status: DiscrepancyStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for recording a discrepancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDiscrepancy {
    pub invoice_id: i64,
    pub user_id: i64,
    pub transaction_id: String,
    pub payment_method_label: String,
    pub amount: Decimal,
    pub reason: String,
}
