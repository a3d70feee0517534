use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::{Booking, BookingStatus, Invoice, InvoiceCategory, NewStatusHistory};
use crate::repositories::UnitOfWork;

use super::booking_lifecycle::BookingLifecycleService;
use super::booking_materializer::BookingMaterializer;

/// What settling an invoice did to its booking.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffectOutcome {
    BookingCreated { booking: Booking },
    /// `days` is zero when no approved extension applied.
    BookingExtended { booking: Booking, days: i32 },
    BookingTransitioned { booking: Booking, from: BookingStatus },
    NoBookingChange { booking_id: Option<i64> },
}

impl SideEffectOutcome {
    pub fn booking_id(&self) -> Option<i64> {
        match self {
            SideEffectOutcome::BookingCreated { booking }
            | SideEffectOutcome::BookingExtended { booking, .. }
            | SideEffectOutcome::BookingTransitioned { booking, .. } => Some(booking.id),
            SideEffectOutcome::NoBookingChange { booking_id } => *booking_id,
        }
    }

    /// The transition to announce, if the booking status changed.
    pub fn transition(&self) -> Option<(&Booking, BookingStatus)> {
        match self {
            SideEffectOutcome::BookingTransitioned { booking, from } => Some((booking, *from)),
            SideEffectOutcome::BookingCreated { .. }
            | SideEffectOutcome::BookingExtended { .. }
            | SideEffectOutcome::NoBookingChange { .. } => None,
        }
    }
}

/// Applies the booking mutation a paid invoice implies, inside the commit unit of work.
pub struct SideEffectDispatcher;

impl SideEffectDispatcher {
    pub async fn dispatch(
        uow: &mut dyn UnitOfWork,
        invoice: &Invoice,
        category: InvoiceCategory,
    ) -> Result<SideEffectOutcome> {
        match category {
            InvoiceCategory::Extension => Self::extend(uow, invoice).await,
            InvoiceCategory::Relocation => {
                Self::transition(uow, invoice, BookingStatus::Relocated, "Relocation").await
            }
            InvoiceCategory::Swap => {
                Self::transition(uow, invoice, BookingStatus::Swapped, "Swap").await
            }
            InvoiceCategory::NewBooking => {
                let materialized =
                    BookingMaterializer::materialize_booking_from_invoice(uow, invoice.id).await?;
                if materialized.created {
                    Ok(SideEffectOutcome::BookingCreated {
                        booking: materialized.booking,
                    })
                } else {
                    Ok(SideEffectOutcome::NoBookingChange {
                        booking_id: Some(materialized.booking.id),
                    })
                }
            }
            InvoiceCategory::AdHoc => Ok(SideEffectOutcome::NoBookingChange {
                booking_id: invoice.booking_id,
            }),
        }
    }

    async fn linked_booking(uow: &mut dyn UnitOfWork, invoice: &Invoice) -> Result<Booking> {
        let booking_id = invoice.booking_id.ok_or_else(|| {
            AppError::Validation(format!(
                "Invoice {} is not linked to a booking",
                invoice.invoice_number
            ))
        })?;
        uow.lock_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking '{}' not found", booking_id)))
    }

    async fn extend(uow: &mut dyn UnitOfWork, invoice: &Invoice) -> Result<SideEffectOutcome> {
        let booking = Self::linked_booking(uow, invoice).await?;

        let request = uow
            .find_approved_extension(invoice.id)
            .await?
            .filter(|r| r.is_applicable() && r.booking_id == booking.id);

        let Some(request) = request else {
            warn!(
                "No approved extension for invoice {}; booking {} left unchanged",
                invoice.invoice_number, booking.booking_number
            );
            return Ok(SideEffectOutcome::BookingExtended { booking, days: 0 });
        };

        let new_end = booking
            .extended_end_date(request.requested_days)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Booking {} cannot be extended by {} day(s)",
                    booking.booking_number, request.requested_days
                ))
            })?;
        let updated = uow.update_booking_end_date(booking.id, new_end).await?;
        uow.append_status_history(&NewStatusHistory::extended(
            booking.id,
            request.requested_days,
            &invoice.invoice_number,
        ))
        .await?;

        info!(
            "Extended booking {} by {} day(s) to {} via invoice {}",
            booking.booking_number, request.requested_days, new_end, invoice.invoice_number
        );
        Ok(SideEffectOutcome::BookingExtended {
            booking: updated,
            days: request.requested_days,
        })
    }

    async fn transition(
        uow: &mut dyn UnitOfWork,
        invoice: &Invoice,
        to: BookingStatus,
        label: &str,
    ) -> Result<SideEffectOutcome> {
        let booking = Self::linked_booking(uow, invoice).await?;
        let from = booking.status;
        let note = Some(format!("{} paid via invoice {}", label, invoice.invoice_number));

        let updated =
            BookingLifecycleService::apply_transition(uow, &booking, to, note, "settlement").await?;
        Ok(SideEffectOutcome::BookingTransitioned {
            booking: updated,
            from,
        })
    }
}
