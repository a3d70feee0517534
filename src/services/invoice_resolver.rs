use crate::error::{AppError, Result};
use crate::models::{BookingStatus, Invoice, InvoiceCategory};
use crate::repositories::{InvoiceLookup, UnitOfWork};

use super::booking_lifecycle::BookingStateMachine;

/// A payable invoice together with the category that decides its side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInvoice {
    pub invoice: Invoice,
    pub category: InvoiceCategory,
}

impl ResolvedInvoice {
    fn new(invoice: Invoice) -> Self {
        let category = invoice.effective_category();
        Self { invoice, category }
    }

    pub fn quote_id(&self) -> Option<i64> {
        self.invoice.quote_id
    }

    pub fn booking_id(&self) -> Option<i64> {
        self.invoice.booking_id
    }
}

/// Loads payable invoices for a caller.
///
/// Missing, foreign and already-settled invoices all yield `NotFoundOrNotPayable` so callers
/// cannot discover which invoices exist.
pub struct InvoiceResolver;

impl InvoiceResolver {
    pub async fn load_payable_invoice(
        uow: &mut dyn UnitOfWork,
        lookup: &InvoiceLookup,
        user_id: i64,
    ) -> Result<ResolvedInvoice> {
        uow.find_payable_invoice(lookup, user_id)
            .await?
            .map(ResolvedInvoice::new)
            .ok_or(AppError::NotFoundOrNotPayable)
    }

    /// Re-reads the invoice under a row lock for the commit transaction.
    pub async fn lock_payable_invoice(
        uow: &mut dyn UnitOfWork,
        invoice_id: i64,
        user_id: i64,
    ) -> Result<ResolvedInvoice> {
        uow.lock_payable_invoice(invoice_id, user_id)
            .await?
            .map(ResolvedInvoice::new)
            .ok_or(AppError::NotFoundOrNotPayable)
    }

    /// Checks that the side effect for this invoice can run, so a charge is never taken for an
    /// invoice whose commit is bound to fail. A linked booking or quote owned by someone other
    /// than the invoice owner is treated as missing.
    pub async fn validate_linkage(uow: &mut dyn UnitOfWork, resolved: &ResolvedInvoice) -> Result<()> {
        let invoice = &resolved.invoice;
        let number = &invoice.invoice_number;

        if resolved.category.requires_booking() {
            let booking_id = resolved.booking_id().ok_or_else(|| {
                AppError::Validation(format!("Invoice {} is not linked to a booking", number))
            })?;
            let booking = uow
                .find_booking(booking_id)
                .await?
                .filter(|b| b.user_id == invoice.user_id)
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "Booking {} linked to invoice {} does not exist",
                        booking_id, number
                    ))
                })?;

            match resolved.category {
                InvoiceCategory::Relocation => {
                    BookingStateMachine::transition(
                        booking.status,
                        BookingStatus::Relocated,
                        booking.service_type,
                    )?;
                }
                InvoiceCategory::Swap => {
                    BookingStateMachine::transition(
                        booking.status,
                        BookingStatus::Swapped,
                        booking.service_type,
                    )?;
                }
                _ => {
                    let request = uow
                        .find_approved_extension(invoice.id)
                        .await?
                        .filter(|r| r.is_applicable() && r.booking_id == booking.id);
                    if let Some(request) = request {
                        if booking.extended_end_date(request.requested_days).is_none() {
                            return Err(AppError::Validation(format!(
                                "Booking {} cannot be extended by {} day(s)",
                                booking.booking_number, request.requested_days
                            )));
                        }
                    }
                }
            }
            return Ok(());
        }

        match resolved.category {
            InvoiceCategory::NewBooking => {
                if uow.find_booking_by_invoice(invoice.id).await?.is_some() {
                    return Ok(());
                }
                let quote_id = resolved.quote_id().ok_or_else(|| {
                    AppError::Validation(format!("Invoice {} is not linked to a quote", number))
                })?;
                let owned = uow
                    .find_quote(quote_id)
                    .await?
                    .is_some_and(|q| q.user_id == invoice.user_id);
                if !owned {
                    return Err(AppError::Validation(format!(
                        "Quote {} for invoice {} does not exist",
                        quote_id, number
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
