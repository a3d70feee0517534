use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    /// Returns true if a settlement may still be attempted.
    pub fn is_payable(&self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::PartiallyPaid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

/// What paying an invoice does to the rest of the system.
///
/// Set explicitly when the invoice is created. Rows written before the column existed carry
/// `NULL` and are categorized from their invoice number via [`InvoiceCategory::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceCategory {
    NewBooking,
    Extension,
    Relocation,
    Swap,
    AdHoc,
}

impl InvoiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceCategory::NewBooking => "new_booking",
            InvoiceCategory::Extension => "extension",
            InvoiceCategory::Relocation => "relocation",
            InvoiceCategory::Swap => "swap",
            InvoiceCategory::AdHoc => "ad_hoc",
        }
    }

    /// Parses the legacy category prefix (`EXT-`, `REL-`, `SWA-`) of an invoice number.
    /// An optional leading `INV-` is ignored, so `INV-EXT-1007` is an extension.
    pub fn from_invoice_number(invoice_number: &str) -> Option<Self> {
        let normalized = invoice_number.trim().to_ascii_uppercase();
        let body = normalized.strip_prefix("INV-").unwrap_or(&normalized);

        if body.starts_with("EXT-") {
            Some(InvoiceCategory::Extension)
        } else if body.starts_with("REL-") {
            Some(InvoiceCategory::Relocation)
        } else if body.starts_with("SWA-") {
            Some(InvoiceCategory::Swap)
        } else {
            None
        }
    }

    /// Resolves the effective category: the stored column wins, then the legacy prefix, then
    /// quote linkage (a quote without a booking yet is a new booking), else an ad-hoc charge.
    pub fn resolve(
        stored: Option<InvoiceCategory>,
        invoice_number: &str,
        quote_id: Option<i64>,
        booking_id: Option<i64>,
    ) -> Self {
        if let Some(category) = stored {
            return category;
        }
        if let Some(category) = Self::from_invoice_number(invoice_number) {
            return category;
        }
        match (quote_id, booking_id) {
            (Some(_), None) => InvoiceCategory::NewBooking,
            _ => InvoiceCategory::AdHoc,
        }
    }

    /// Returns true if the side effect mutates an existing booking.
    pub fn requires_booking(&self) -> bool {
        matches!(
            self,
            InvoiceCategory::Extension | InvoiceCategory::Relocation | InvoiceCategory::Swap
        )
    }
}

/// A billable record representing one charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: i64,
    pub user_id: i64,
    pub invoice_number: String,
    pub quote_id: Option<i64>,
    pub booking_id: Option<i64>,
    pub category: Option<InvoiceCategory>,
    pub amount: Decimal,
    pub amount_paid: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub status: InvoiceStatus,
    /// Display label of the instrument used, e.g. "Visa ending in 4242".
    pub payment_method: Option<String>,
    /// Gateway reference of the successful authorization.
    pub transaction_id: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Creates a pending invoice. Used by fixtures and by the in-memory store.
    pub fn new(id: i64, user_id: i64, invoice_number: impl Into<String>, amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            invoice_number: invoice_number.into(),
            quote_id: None,
            booking_id: None,
            category: None,
            amount,
            amount_paid: Decimal::ZERO,
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
            status: InvoiceStatus::Pending,
            payment_method: None,
            transaction_id: None,
            due_date: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_quote(mut self, quote_id: i64) -> Self {
        self.quote_id = Some(quote_id);
        self
    }

    pub fn with_booking(mut self, booking_id: i64) -> Self {
        self.booking_id = Some(booking_id);
        self
    }

    pub fn with_category(mut self, category: InvoiceCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Effective category for side-effect dispatch.
    pub fn effective_category(&self) -> InvoiceCategory {
        InvoiceCategory::resolve(
            self.category,
            &self.invoice_number,
            self.quote_id,
            self.booking_id,
        )
    }

    /// Outstanding amount still to be charged.
    pub fn balance_due(&self) -> Decimal {
        self.amount - self.amount_paid
    }

    pub fn is_payable(&self) -> bool {
        self.status.is_payable() && self.balance_due() > Decimal::ZERO
    }

    /// Marks the invoice paid with the gateway reference. Only payable invoices move forward.
    pub fn mark_paid(&mut self, payment_method: &str, transaction_id: &str) -> bool {
        if !self.status.is_payable() {
            return false;
        }
        let now = Utc::now();
        self.status = InvoiceStatus::Paid;
        self.amount_paid = self.amount;
        self.payment_method = Some(payment_method.to_string());
        self.transaction_id = Some(transaction_id.to_string());
        self.paid_at = Some(now);
        self.updated_at = now;
        true
    }
}
