use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{InvoiceLookup, SettlementStore, UnitOfWork};
use crate::error::{AppError, Result};
use crate::models::{
    Booking, BookingLineItem, BookingStatus, BookingStatusHistory, CustomerBillingProfile,
    DiscrepancyStatus, DriverAccessToken, ExtensionRequest, Invoice, NewBooking, NewDiscrepancy,
    NewPaymentMethod, NewStatusHistory, PaymentMethodReference, Quote, QuoteLineItem,
    QuoteStatus, SettlementDiscrepancy,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    invoices: BTreeMap<i64, Invoice>,
    quotes: BTreeMap<i64, Quote>,
    quote_line_items: Vec<QuoteLineItem>,
    bookings: BTreeMap<i64, Booking>,
    booking_line_items: Vec<BookingLineItem>,
    history: Vec<BookingStatusHistory>,
    extensions: Vec<ExtensionRequest>,
    profiles: BTreeMap<i64, CustomerBillingProfile>,
    payment_methods: BTreeMap<i64, PaymentMethodReference>,
    driver_tokens: Vec<DriverAccessToken>,
    discrepancies: BTreeMap<i64, SettlementDiscrepancy>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn reserve_id(&mut self, id: i64) {
        self.last_id = self.last_id.max(id);
    }
}

/// Store that keeps every table in process memory.
///
/// A unit of work holds the store lock for its whole lifetime and mutates a staged copy, so
/// units of work are fully serialized and a dropped unit leaves no trace. Operations can be
/// made to fail by name with [`InMemoryStore::fail_on`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failures: Arc<StdMutex<HashSet<&'static str>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the named unit-of-work operation (e.g. `"commit"`, `"insert_booking"`) fail.
    pub fn fail_on(&self, operation: &'static str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(operation);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    // Seeding

    pub async fn seed_invoice(&self, invoice: Invoice) {
        let mut state = self.state.lock().await;
        state.reserve_id(invoice.id);
        state.invoices.insert(invoice.id, invoice);
    }

    pub async fn seed_quote(&self, quote: Quote, items: Vec<QuoteLineItem>) {
        let mut state = self.state.lock().await;
        state.reserve_id(quote.id);
        for item in &items {
            state.reserve_id(item.id);
        }
        state.quotes.insert(quote.id, quote);
        state.quote_line_items.extend(items);
    }

    pub async fn seed_booking(&self, booking: Booking) {
        let mut state = self.state.lock().await;
        state.reserve_id(booking.id);
        state.bookings.insert(booking.id, booking);
    }

    pub async fn seed_history(&self, entry: BookingStatusHistory) {
        let mut state = self.state.lock().await;
        state.reserve_id(entry.id);
        state.history.push(entry);
    }

    pub async fn seed_extension(&self, request: ExtensionRequest) {
        let mut state = self.state.lock().await;
        state.reserve_id(request.id);
        state.extensions.push(request);
    }

    pub async fn seed_billing_profile(&self, profile: CustomerBillingProfile) {
        let mut state = self.state.lock().await;
        state.profiles.insert(profile.user_id, profile);
    }

    pub async fn seed_payment_method(&self, method: PaymentMethodReference) {
        let mut state = self.state.lock().await;
        state.reserve_id(method.id);
        state.payment_methods.insert(method.id, method);
    }

    pub async fn seed_driver_token(&self, token: DriverAccessToken) {
        let mut state = self.state.lock().await;
        state.reserve_id(token.id);
        state.driver_tokens.push(token);
    }

    // Inspection

    pub async fn invoice(&self, invoice_id: i64) -> Option<Invoice> {
        self.state.lock().await.invoices.get(&invoice_id).cloned()
    }

    pub async fn quote(&self, quote_id: i64) -> Option<Quote> {
        self.state.lock().await.quotes.get(&quote_id).cloned()
    }

    pub async fn booking(&self, booking_id: i64) -> Option<Booking> {
        self.state.lock().await.bookings.get(&booking_id).cloned()
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.state.lock().await.bookings.values().cloned().collect()
    }

    pub async fn booking_line_items(&self, booking_id: i64) -> Vec<BookingLineItem> {
        self.state
            .lock()
            .await
            .booking_line_items
            .iter()
            .filter(|item| item.booking_id == booking_id)
            .cloned()
            .collect()
    }

    pub async fn history(&self, booking_id: i64) -> Vec<BookingStatusHistory> {
        self.state.lock().await.history_for(booking_id)
    }

    pub async fn billing_profile(&self, user_id: i64) -> Option<CustomerBillingProfile> {
        self.state.lock().await.profiles.get(&user_id).cloned()
    }

    pub async fn payment_methods(&self, user_id: i64) -> Vec<PaymentMethodReference> {
        self.state
            .lock()
            .await
            .payment_methods
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn discrepancies(&self) -> Vec<SettlementDiscrepancy> {
        self.state.lock().await.discrepancies.values().cloned().collect()
    }
}

impl MemoryState {
    fn history_for(&self, booking_id: i64) -> Vec<BookingStatusHistory> {
        let mut rows: Vec<_> = self
            .history
            .iter()
            .filter(|h| h.booking_id == booking_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows
    }

    fn payable_invoice(&self, invoice_id: i64, user_id: i64) -> Option<Invoice> {
        self.invoices
            .get(&invoice_id)
            .filter(|i| i.user_id == user_id && i.status.is_payable())
            .cloned()
    }
}

#[async_trait]
impl SettlementStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            guard,
            staged,
            failures: self.failures.clone(),
        }))
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    failures: Arc<StdMutex<HashSet<&'static str>>>,
}

impl MemoryUnitOfWork {
    fn check(&self, operation: &'static str) -> Result<()> {
        let injected = self
            .failures
            .lock()
            .map(|failures| failures.contains(operation))
            .unwrap_or(false);
        if injected {
            return Err(AppError::Internal(anyhow!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }

    fn booking_mut(&mut self, booking_id: i64) -> Result<&mut Booking> {
        self.staged
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| AppError::NotFound(format!("Booking '{}' not found", booking_id)))
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_payable_invoice(
        &mut self,
        lookup: &InvoiceLookup,
        user_id: i64,
    ) -> Result<Option<Invoice>> {
        self.check("find_payable_invoice")?;
        let found = match lookup {
            InvoiceLookup::Id(id) => self.staged.payable_invoice(*id, user_id),
            InvoiceLookup::Number(number) => self
                .staged
                .invoices
                .values()
                .find(|i| &i.invoice_number == number)
                .and_then(|i| self.staged.payable_invoice(i.id, user_id)),
            InvoiceLookup::Quote(quote_id) => self
                .staged
                .invoices
                .values()
                .filter(|i| {
                    i.quote_id == Some(*quote_id) && i.user_id == user_id && i.status.is_payable()
                })
                .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
                .cloned(),
        };
        Ok(found)
    }

    async fn lock_payable_invoice(
        &mut self,
        invoice_id: i64,
        user_id: i64,
    ) -> Result<Option<Invoice>> {
        self.check("lock_payable_invoice")?;
        Ok(self.staged.payable_invoice(invoice_id, user_id))
    }

    async fn find_invoice(&mut self, invoice_id: i64) -> Result<Option<Invoice>> {
        self.check("find_invoice")?;
        Ok(self.staged.invoices.get(&invoice_id).cloned())
    }

    async fn mark_invoice_paid(
        &mut self,
        invoice_id: i64,
        payment_method: &str,
        transaction_id: &str,
    ) -> Result<Option<Invoice>> {
        self.check("mark_invoice_paid")?;
        let Some(invoice) = self.staged.invoices.get_mut(&invoice_id) else {
            return Ok(None);
        };
        if invoice.mark_paid(payment_method, transaction_id) {
            Ok(Some(invoice.clone()))
        } else {
            Ok(None)
        }
    }

    async fn link_invoice_booking(&mut self, invoice_id: i64, booking_id: i64) -> Result<()> {
        self.check("link_invoice_booking")?;
        if let Some(invoice) = self.staged.invoices.get_mut(&invoice_id) {
            invoice.booking_id = Some(booking_id);
            invoice.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_billing_profile(
        &mut self,
        user_id: i64,
    ) -> Result<Option<CustomerBillingProfile>> {
        self.check("find_billing_profile")?;
        Ok(self.staged.profiles.get(&user_id).cloned())
    }

    async fn upsert_billing_profile(
        &mut self,
        user_id: i64,
        external_customer_id: &str,
    ) -> Result<CustomerBillingProfile> {
        self.check("upsert_billing_profile")?;
        let profile = self
            .staged
            .profiles
            .entry(user_id)
            .or_insert_with(|| CustomerBillingProfile {
                user_id,
                external_customer_id: external_customer_id.to_string(),
                created_at: Utc::now(),
            });
        Ok(profile.clone())
    }

    async fn find_payment_method(
        &mut self,
        user_id: i64,
        method_id: i64,
    ) -> Result<Option<PaymentMethodReference>> {
        self.check("find_payment_method")?;
        Ok(self
            .staged
            .payment_methods
            .get(&method_id)
            .filter(|m| m.user_id == user_id)
            .cloned())
    }

    async fn insert_payment_method(
        &mut self,
        method: &NewPaymentMethod,
    ) -> Result<PaymentMethodReference> {
        self.check("insert_payment_method")?;
        if method.is_default {
            for existing in self.staged.payment_methods.values_mut() {
                if existing.user_id == method.user_id {
                    existing.is_default = false;
                }
            }
        }

        let existing_id = self
            .staged
            .payment_methods
            .values()
            .find(|m| m.user_id == method.user_id && m.gateway_method_id == method.gateway_method_id)
            .map(|m| m.id);
        let id = match existing_id {
            Some(id) => id,
            None => self.staged.next_id(),
        };
        let created_at = self
            .staged
            .payment_methods
            .get(&id)
            .map(|m| m.created_at)
            .unwrap_or_else(Utc::now);

        let stored = PaymentMethodReference {
            id,
            user_id: method.user_id,
            gateway_method_id: method.gateway_method_id.clone(),
            brand: method.brand.clone(),
            last4: method.last4.clone(),
            is_default: method.is_default,
            created_at,
        };
        self.staged.payment_methods.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_booking(&mut self, booking_id: i64) -> Result<Option<Booking>> {
        self.check("find_booking")?;
        Ok(self.staged.bookings.get(&booking_id).cloned())
    }

    async fn lock_booking(&mut self, booking_id: i64) -> Result<Option<Booking>> {
        self.check("lock_booking")?;
        Ok(self.staged.bookings.get(&booking_id).cloned())
    }

    async fn find_booking_by_invoice(&mut self, invoice_id: i64) -> Result<Option<Booking>> {
        self.check("find_booking_by_invoice")?;
        Ok(self
            .staged
            .bookings
            .values()
            .find(|b| b.invoice_id == Some(invoice_id))
            .cloned())
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> Result<Option<Booking>> {
        self.check("insert_booking")?;
        if let Some(invoice_id) = booking.invoice_id {
            if self
                .staged
                .bookings
                .values()
                .any(|b| b.invoice_id == Some(invoice_id))
            {
                return Ok(None);
            }
        }
        if self
            .staged
            .bookings
            .values()
            .any(|b| b.booking_number == booking.booking_number)
        {
            return Err(AppError::Internal(anyhow!(
                "duplicate booking number {}",
                booking.booking_number
            )));
        }

        let id = self.staged.next_id();
        let stored = booking.clone().into_booking(id);
        self.staged.bookings.insert(id, stored.clone());
        Ok(Some(stored))
    }

    async fn update_booking_status(
        &mut self,
        booking_id: i64,
        status: BookingStatus,
    ) -> Result<Booking> {
        self.check("update_booking_status")?;
        let booking = self.booking_mut(booking_id)?;
        booking.status = status;
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn update_booking_end_date(
        &mut self,
        booking_id: i64,
        end_date: NaiveDate,
    ) -> Result<Booking> {
        self.check("update_booking_end_date")?;
        let booking = self.booking_mut(booking_id)?;
        booking.end_date = end_date;
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    async fn insert_booking_line_items(
        &mut self,
        booking_id: i64,
        items: &[QuoteLineItem],
    ) -> Result<Vec<BookingLineItem>> {
        self.check("insert_booking_line_items")?;
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let row = BookingLineItem {
                id: self.staged.next_id(),
                booking_id,
                kind: item.kind,
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            };
            self.staged.booking_line_items.push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn list_booking_line_items(&mut self, booking_id: i64) -> Result<Vec<BookingLineItem>> {
        self.check("list_booking_line_items")?;
        Ok(self
            .staged
            .booking_line_items
            .iter()
            .filter(|item| item.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn append_status_history(
        &mut self,
        entry: &NewStatusHistory,
    ) -> Result<BookingStatusHistory> {
        self.check("append_status_history")?;
        let row = BookingStatusHistory {
            id: self.staged.next_id(),
            booking_id: entry.booking_id,
            status: entry.status.clone(),
            note: entry.note.clone(),
            created_at: Utc::now(),
        };
        self.staged.history.push(row.clone());
        Ok(row)
    }

    async fn list_status_history(
        &mut self,
        booking_id: i64,
    ) -> Result<Vec<BookingStatusHistory>> {
        self.check("list_status_history")?;
        Ok(self.staged.history_for(booking_id))
    }

    async fn find_approved_extension(
        &mut self,
        invoice_id: i64,
    ) -> Result<Option<ExtensionRequest>> {
        self.check("find_approved_extension")?;
        Ok(self
            .staged
            .extensions
            .iter()
            .filter(|r| {
                r.invoice_id == Some(invoice_id)
                    && r.status == crate::models::ExtensionStatus::Approved
            })
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn find_quote(&mut self, quote_id: i64) -> Result<Option<Quote>> {
        self.check("find_quote")?;
        Ok(self.staged.quotes.get(&quote_id).cloned())
    }

    async fn list_quote_line_items(&mut self, quote_id: i64) -> Result<Vec<QuoteLineItem>> {
        self.check("list_quote_line_items")?;
        Ok(self
            .staged
            .quote_line_items
            .iter()
            .filter(|item| item.quote_id == quote_id)
            .cloned()
            .collect())
    }

    async fn mark_quote_converted(&mut self, quote_id: i64) -> Result<()> {
        self.check("mark_quote_converted")?;
        if let Some(quote) = self.staged.quotes.get_mut(&quote_id) {
            quote.status = QuoteStatus::Converted;
        }
        Ok(())
    }

    async fn find_driver_token(&mut self, token_hash: &str) -> Result<Option<DriverAccessToken>> {
        self.check("find_driver_token")?;
        Ok(self
            .staged
            .driver_tokens
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn insert_discrepancy(
        &mut self,
        discrepancy: &NewDiscrepancy,
    ) -> Result<SettlementDiscrepancy> {
        self.check("insert_discrepancy")?;
        let now = Utc::now();
        let existing = self
            .staged
            .discrepancies
            .values_mut()
            .find(|d| d.transaction_id == discrepancy.transaction_id);
        if let Some(row) = existing {
            row.reason = discrepancy.reason.clone();
            row.updated_at = now;
            return Ok(row.clone());
        }

        let row = SettlementDiscrepancy {
            id: self.staged.next_id(),
            invoice_id: discrepancy.invoice_id,
            user_id: discrepancy.user_id,
            transaction_id: discrepancy.transaction_id.clone(),
            payment_method_label: discrepancy.payment_method_label.clone(),
            amount: discrepancy.amount,
            reason: discrepancy.reason.clone(),
            status: DiscrepancyStatus::Open,
            attempts: 0,
            created_at: now,
            updated_at: now,
        };
        self.staged.discrepancies.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_open_discrepancies(&mut self, limit: i64) -> Result<Vec<SettlementDiscrepancy>> {
        self.check("list_open_discrepancies")?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .staged
            .discrepancies
            .values()
            .filter(|d| d.status == DiscrepancyStatus::Open)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record_discrepancy_attempt(
        &mut self,
        discrepancy_id: i64,
        status: DiscrepancyStatus,
    ) -> Result<SettlementDiscrepancy> {
        self.check("record_discrepancy_attempt")?;
        let row = self
            .staged
            .discrepancies
            .get_mut(&discrepancy_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Discrepancy '{}' not found", discrepancy_id))
            })?;
        row.status = status;
        row.attempts += 1;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check("commit")?;
        let MemoryUnitOfWork {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_commit_publishes_staged_changes() {
        let store = InMemoryStore::new();
        store.seed_invoice(Invoice::new(1, 7, "INV-1", dec!(10.00))).await;

        let mut uow = store.begin().await.unwrap();
        let paid = uow.mark_invoice_paid(1, "Card", "pi_1").await.unwrap();
        assert!(paid.is_some());
        uow.commit().await.unwrap();

        let invoice = store.invoice(1).await.unwrap();
        assert_eq!(invoice.transaction_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_discards_changes() {
        let store = InMemoryStore::new();
        store.seed_invoice(Invoice::new(1, 7, "INV-1", dec!(10.00))).await;

        {
            let mut uow = store.begin().await.unwrap();
            uow.mark_invoice_paid(1, "Card", "pi_1").await.unwrap();
        }

        assert!(store.invoice(1).await.unwrap().status.is_payable());
    }

    #[tokio::test]
    async fn test_injected_commit_failure_keeps_state() {
        let store = InMemoryStore::new();
        store.seed_invoice(Invoice::new(1, 7, "INV-1", dec!(10.00))).await;
        store.fail_on("commit");

        let mut uow = store.begin().await.unwrap();
        uow.mark_invoice_paid(1, "Card", "pi_1").await.unwrap();
        assert!(uow.commit().await.is_err());
        assert!(store.invoice(1).await.unwrap().status.is_payable());
    }

    #[tokio::test]
    async fn test_payable_lookup_hides_foreign_invoices() {
        let store = InMemoryStore::new();
        store.seed_invoice(Invoice::new(1, 7, "INV-1", dec!(10.00))).await;

        let mut uow = store.begin().await.unwrap();
        let mine = uow
            .find_payable_invoice(&InvoiceLookup::Number("INV-1".into()), 7)
            .await
            .unwrap();
        let theirs = uow
            .find_payable_invoice(&InvoiceLookup::Id(1), 8)
            .await
            .unwrap();
        assert!(mine.is_some());
        assert!(theirs.is_none());
    }
}
