use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{LineItemKind, ServiceType};

/// Quote lifecycle as far as this engine is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "quote_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Pending,
    Quoted,
    Accepted,
    Converted,
    Rejected,
}

/// A priced quote. Pricing fields are computed upstream and consumed as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Quote {
    pub id: i64,
    pub user_id: i64,
    pub service_type: ServiceType,
    pub status: QuoteStatus,
    pub quoted_price: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Quote {
    /// Total the customer pays: quoted price less discount plus tax.
    pub fn total(&self) -> Decimal {
        self.quoted_price - self.discount + self.tax
    }
}

/// Equipment or junk-removal item captured on a quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct QuoteLineItem {
    pub id: i64,
    pub quote_id: i64,
    pub kind: LineItemKind,
    pub description: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}
