pub mod billing_repository;
pub mod booking_repository;
pub mod discrepancy_repository;
pub mod driver_repository;
pub mod in_memory;
pub mod invoice_repository;
pub mod postgres_store;
pub mod quote_repository;

pub use billing_repository::BillingRepository;
pub use booking_repository::BookingRepository;
pub use discrepancy_repository::DiscrepancyRepository;
pub use driver_repository::DriverRepository;
pub use in_memory::InMemoryStore;
pub use invoice_repository::InvoiceRepository;
pub use postgres_store::{PgStore, PgUnitOfWork};
pub use quote_repository::QuoteRepository;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{
    Booking, BookingLineItem, BookingStatus, BookingStatusHistory, CustomerBillingProfile,
    DiscrepancyStatus, DriverAccessToken, ExtensionRequest, Invoice, NewBooking, NewDiscrepancy,
    NewPaymentMethod, NewStatusHistory, PaymentMethodReference, Quote, QuoteLineItem,
    SettlementDiscrepancy,
};

/// How a caller identifies the invoice to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceLookup {
    Id(i64),
    Number(String),
    /// The payable invoice issued for a quote.
    Quote(i64),
}

/// Source of transactional units of work.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// One local transaction. Dropping without [`UnitOfWork::commit`] discards every change.
#[async_trait]
pub trait UnitOfWork: Send {
    // Invoices

    /// Payable invoice owned by `user_id`, or `None` for missing, foreign, or settled invoices.
    async fn find_payable_invoice(
        &mut self,
        lookup: &InvoiceLookup,
        user_id: i64,
    ) -> Result<Option<Invoice>>;

    /// Same as `find_payable_invoice` by id, holding a row lock until the transaction ends.
    async fn lock_payable_invoice(&mut self, invoice_id: i64, user_id: i64)
        -> Result<Option<Invoice>>;

    async fn find_invoice(&mut self, invoice_id: i64) -> Result<Option<Invoice>>;

    /// Moves a payable invoice to `paid`. Returns `None` if it was no longer payable.
    async fn mark_invoice_paid(
        &mut self,
        invoice_id: i64,
        payment_method: &str,
        transaction_id: &str,
    ) -> Result<Option<Invoice>>;

    async fn link_invoice_booking(&mut self, invoice_id: i64, booking_id: i64) -> Result<()>;

    // Billing

    async fn find_billing_profile(&mut self, user_id: i64)
        -> Result<Option<CustomerBillingProfile>>;

    /// Inserts the profile unless one exists for the user; returns whichever row is stored.
    async fn upsert_billing_profile(
        &mut self,
        user_id: i64,
        external_customer_id: &str,
    ) -> Result<CustomerBillingProfile>;

    async fn find_payment_method(
        &mut self,
        user_id: i64,
        method_id: i64,
    ) -> Result<Option<PaymentMethodReference>>;

    async fn insert_payment_method(
        &mut self,
        method: &NewPaymentMethod,
    ) -> Result<PaymentMethodReference>;

    // Bookings

    async fn find_booking(&mut self, booking_id: i64) -> Result<Option<Booking>>;

    async fn lock_booking(&mut self, booking_id: i64) -> Result<Option<Booking>>;

    async fn find_booking_by_invoice(&mut self, invoice_id: i64) -> Result<Option<Booking>>;

    /// Inserts a booking. Returns `None` if a booking already exists for its invoice.
    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Option<Booking>>;

    async fn update_booking_status(
        &mut self,
        booking_id: i64,
        status: BookingStatus,
    ) -> Result<Booking>;

    async fn update_booking_end_date(
        &mut self,
        booking_id: i64,
        end_date: NaiveDate,
    ) -> Result<Booking>;

    async fn insert_booking_line_items(
        &mut self,
        booking_id: i64,
        items: &[QuoteLineItem],
    ) -> Result<Vec<BookingLineItem>>;

    async fn list_booking_line_items(&mut self, booking_id: i64) -> Result<Vec<BookingLineItem>>;

    async fn append_status_history(
        &mut self,
        entry: &NewStatusHistory,
    ) -> Result<BookingStatusHistory>;

    /// History ordered by timestamp, then insertion order.
    async fn list_status_history(&mut self, booking_id: i64)
        -> Result<Vec<BookingStatusHistory>>;

    async fn find_approved_extension(&mut self, invoice_id: i64)
        -> Result<Option<ExtensionRequest>>;

    // Quotes

    async fn find_quote(&mut self, quote_id: i64) -> Result<Option<Quote>>;

    async fn list_quote_line_items(&mut self, quote_id: i64) -> Result<Vec<QuoteLineItem>>;

    async fn mark_quote_converted(&mut self, quote_id: i64) -> Result<()>;

    // Drivers

    async fn find_driver_token(&mut self, token_hash: &str) -> Result<Option<DriverAccessToken>>;

    // Discrepancies

    async fn insert_discrepancy(
        &mut self,
        discrepancy: &NewDiscrepancy,
    ) -> Result<SettlementDiscrepancy>;

    async fn list_open_discrepancies(&mut self, limit: i64) -> Result<Vec<SettlementDiscrepancy>>;

    /// Sets the status and bumps the attempt counter.
    async fn record_discrepancy_attempt(
        &mut self,
        discrepancy_id: i64,
        status: DiscrepancyStatus,
    ) -> Result<SettlementDiscrepancy>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
