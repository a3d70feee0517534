use chrono::{NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Booking, BookingStatus, NewBooking, NewStatusHistory};
use crate::observability::get_metrics;
use crate::repositories::UnitOfWork;

/// A booking for an invoice, and whether this call created it.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedBooking {
    pub booking: Booking,
    pub created: bool,
}

/// Generates a booking number of the form `BK-YYYYMMDD-XXXXXX`.
pub fn generate_booking_number(date: NaiveDate) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect::<String>()
        .to_ascii_uppercase();
    format!("BK-{}-{}", date.format("%Y%m%d"), suffix)
}

/// Turns a paid new-booking invoice into exactly one booking.
pub struct BookingMaterializer;

impl BookingMaterializer {
    /// Returns the booking for `invoice_id`, creating it from the invoice's quote if none exists.
    ///
    /// Runs inside the caller's unit of work. A concurrent insert for the same invoice is
    /// absorbed by the unique `invoice_id` and the existing row is returned.
    pub async fn materialize_booking_from_invoice(
        uow: &mut dyn UnitOfWork,
        invoice_id: i64,
    ) -> Result<MaterializedBooking> {
        if let Some(booking) = uow.find_booking_by_invoice(invoice_id).await? {
            get_metrics().record_booking_materialized(false);
            return Ok(MaterializedBooking {
                booking,
                created: false,
            });
        }

        let invoice = uow
            .find_invoice(invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Invoice '{}' not found", invoice_id)))?;

        let quote_id = invoice.quote_id.ok_or_else(|| {
            AppError::Validation(format!(
                "Invoice {} is not linked to a quote",
                invoice.invoice_number
            ))
        })?;
        let quote = uow.find_quote(quote_id).await?.ok_or_else(|| {
            AppError::Validation(format!(
                "Quote {} for invoice {} does not exist",
                quote_id, invoice.invoice_number
            ))
        })?;

        let new_booking = NewBooking {
            booking_number: generate_booking_number(Utc::now().date_naive()),
            user_id: invoice.user_id,
            quote_id: Some(quote.id),
            invoice_id: Some(invoice.id),
            service_type: quote.service_type,
            status: BookingStatus::Scheduled,
            start_date: quote.start_date,
            end_date: quote.end_date,
            subtotal: quote.quoted_price,
            discount: quote.discount,
            tax: quote.tax,
            total: quote.total(),
        };

        let booking = match uow.insert_booking(&new_booking).await? {
            Some(booking) => booking,
            None => {
                let existing = uow.find_booking_by_invoice(invoice_id).await?.ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!(
                        "booking insert for invoice {} conflicted but no booking was found",
                        invoice_id
                    ))
                })?;
                get_metrics().record_booking_materialized(false);
                return Ok(MaterializedBooking {
                    booking: existing,
                    created: false,
                });
            }
        };

        let items = uow.list_quote_line_items(quote.id).await?;
        uow.insert_booking_line_items(booking.id, &items).await?;
        uow.link_invoice_booking(invoice.id, booking.id).await?;
        uow.mark_quote_converted(quote.id).await?;
        uow.append_status_history(&NewStatusHistory::for_status(
            booking.id,
            BookingStatus::Scheduled,
            Some(format!("Booking created from invoice {}", invoice.invoice_number)),
        ))
        .await?;

        get_metrics().record_booking_materialized(true);
        info!(
            "Materialized booking {} from invoice {} ({} line items)",
            booking.booking_number,
            invoice.invoice_number,
            items.len()
        );

        Ok(MaterializedBooking {
            booking,
            created: true,
        })
    }
}
