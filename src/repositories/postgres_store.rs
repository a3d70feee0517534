use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};

use super::{
    BillingRepository, BookingRepository, DiscrepancyRepository, DriverRepository,
    InvoiceLookup, InvoiceRepository, QuoteRepository, SettlementStore, UnitOfWork,
};
use crate::error::{AppError, Result};
use crate::models::{
    Booking, BookingLineItem, BookingStatus, BookingStatusHistory, CustomerBillingProfile,
    DiscrepancyStatus, DriverAccessToken, ExtensionRequest, Invoice, NewBooking, NewDiscrepancy,
    NewPaymentMethod, NewStatusHistory, PaymentMethodReference, Quote, QuoteLineItem,
    SettlementDiscrepancy,
};

/// Postgres-backed store. Each unit of work is one database transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(AppError::Database)?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// A Postgres transaction; rolled back on drop unless committed.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_payable_invoice(
        &mut self,
        lookup: &InvoiceLookup,
        user_id: i64,
    ) -> Result<Option<Invoice>> {
        InvoiceRepository::find_payable(&mut self.tx, lookup, user_id).await
    }

    async fn lock_payable_invoice(
        &mut self,
        invoice_id: i64,
        user_id: i64,
    ) -> Result<Option<Invoice>> {
        InvoiceRepository::lock_payable(&mut self.tx, invoice_id, user_id).await
    }

    async fn find_invoice(&mut self, invoice_id: i64) -> Result<Option<Invoice>> {
        InvoiceRepository::find_by_id(&mut self.tx, invoice_id).await
    }

    async fn mark_invoice_paid(
        &mut self,
        invoice_id: i64,
        payment_method: &str,
        transaction_id: &str,
    ) -> Result<Option<Invoice>> {
        InvoiceRepository::mark_paid(&mut self.tx, invoice_id, payment_method, transaction_id)
            .await
    }

    async fn link_invoice_booking(&mut self, invoice_id: i64, booking_id: i64) -> Result<()> {
        InvoiceRepository::link_booking(&mut self.tx, invoice_id, booking_id).await
    }

    async fn find_billing_profile(
        &mut self,
        user_id: i64,
    ) -> Result<Option<CustomerBillingProfile>> {
        BillingRepository::find_profile(&mut self.tx, user_id).await
    }

    async fn upsert_billing_profile(
        &mut self,
        user_id: i64,
        external_customer_id: &str,
    ) -> Result<CustomerBillingProfile> {
        BillingRepository::upsert_profile(&mut self.tx, user_id, external_customer_id).await
    }

    async fn find_payment_method(
        &mut self,
        user_id: i64,
        method_id: i64,
    ) -> Result<Option<PaymentMethodReference>> {
        BillingRepository::find_payment_method(&mut self.tx, user_id, method_id).await
    }

    async fn insert_payment_method(
        &mut self,
        method: &NewPaymentMethod,
    ) -> Result<PaymentMethodReference> {
        BillingRepository::insert_payment_method(&mut self.tx, method).await
    }

    async fn find_booking(&mut self, booking_id: i64) -> Result<Option<Booking>> {
        BookingRepository::find_by_id(&mut self.tx, booking_id).await
    }

    async fn lock_booking(&mut self, booking_id: i64) -> Result<Option<Booking>> {
        BookingRepository::lock_by_id(&mut self.tx, booking_id).await
    }

    async fn find_booking_by_invoice(&mut self, invoice_id: i64) -> Result<Option<Booking>> {
        BookingRepository::find_by_invoice(&mut self.tx, invoice_id).await
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Option<Booking>> {
        BookingRepository::insert(&mut self.tx, booking).await
    }

    async fn update_booking_status(
        &mut self,
        booking_id: i64,
        status: BookingStatus,
    ) -> Result<Booking> {
        BookingRepository::update_status(&mut self.tx, booking_id, status).await
    }

    async fn update_booking_end_date(
        &mut self,
        booking_id: i64,
        end_date: NaiveDate,
    ) -> Result<Booking> {
        BookingRepository::update_end_date(&mut self.tx, booking_id, end_date).await
    }

    async fn insert_booking_line_items(
        &mut self,
        booking_id: i64,
        items: &[QuoteLineItem],
    ) -> Result<Vec<BookingLineItem>> {
        BookingRepository::insert_line_items(&mut self.tx, booking_id, items).await
    }

    async fn list_booking_line_items(&mut self, booking_id: i64) -> Result<Vec<BookingLineItem>> {
        BookingRepository::list_line_items(&mut self.tx, booking_id).await
    }

    async fn append_status_history(
        &mut self,
        entry: &NewStatusHistory,
    ) -> Result<BookingStatusHistory> {
        BookingRepository::append_history(&mut self.tx, entry).await
    }

    async fn list_status_history(
        &mut self,
        booking_id: i64,
    ) -> Result<Vec<BookingStatusHistory>> {
        BookingRepository::list_history(&mut self.tx, booking_id).await
    }

    async fn find_approved_extension(
        &mut self,
        invoice_id: i64,
    ) -> Result<Option<ExtensionRequest>> {
        BookingRepository::find_approved_extension(&mut self.tx, invoice_id).await
    }

    async fn find_quote(&mut self, quote_id: i64) -> Result<Option<Quote>> {
        QuoteRepository::find_by_id(&mut self.tx, quote_id).await
    }

    async fn list_quote_line_items(&mut self, quote_id: i64) -> Result<Vec<QuoteLineItem>> {
        QuoteRepository::list_line_items(&mut self.tx, quote_id).await
    }

    async fn mark_quote_converted(&mut self, quote_id: i64) -> Result<()> {
        QuoteRepository::mark_converted(&mut self.tx, quote_id).await
    }

    async fn find_driver_token(&mut self, token_hash: &str) -> Result<Option<DriverAccessToken>> {
        DriverRepository::find_token(&mut self.tx, token_hash).await
    }

    async fn insert_discrepancy(
        &mut self,
        discrepancy: &NewDiscrepancy,
    ) -> Result<SettlementDiscrepancy> {
        DiscrepancyRepository::insert(&mut self.tx, discrepancy).await
    }

    async fn list_open_discrepancies(&mut self, limit: i64) -> Result<Vec<SettlementDiscrepancy>> {
        DiscrepancyRepository::list_open(&mut self.tx, limit).await
    }

    async fn record_discrepancy_attempt(
        &mut self,
        discrepancy_id: i64,
        status: DiscrepancyStatus,
    ) -> Result<SettlementDiscrepancy> {
        DiscrepancyRepository::record_attempt(&mut self.tx, discrepancy_id, status).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(AppError::Database)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(AppError::Database)
    }
}
