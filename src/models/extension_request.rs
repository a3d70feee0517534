use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Approval state of a rental extension request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "extension_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    Pending,
    Approved,
    Rejected,
}

/// A request to add days to a booking, billed through an extension invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExtensionRequest {
    pub id: i64,
    pub booking_id: i64,
    pub invoice_id: Option<i64>,
    pub requested_days: i32,
    pub status: ExtensionStatus,
    pub created_at: DateTime<Utc>,
}

impl ExtensionRequest {
    /// Returns true if settlement should push the booking's end date.
    pub fn is_applicable(&self) -> bool {
        self.status == ExtensionStatus::Approved && self.requested_days > 0
    }
}
