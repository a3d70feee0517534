use crate::error::{AppError, Result};
use crate::models::{
    Booking, BookingLineItem, BookingStatus, BookingStatusHistory, ExtensionRequest, NewBooking,
    NewStatusHistory, QuoteLineItem,
};
use chrono::NaiveDate;
use sqlx::PgConnection;

/// Queries over bookings, their line items, status history and extension requests.
pub struct BookingRepository;

impl BookingRepository {
    pub async fn find_by_id(conn: &mut PgConnection, booking_id: i64) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, Booking>(
            r#"
            SELECT id, booking_number, user_id, quote_id, invoice_id, service_type, status, start_date, end_date, subtotal, discount, tax, total, driver_id, created_at, updated_at
            FROM bookings
            WHERE id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn lock_by_id(conn: &mut PgConnection, booking_id: i64) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, Booking>(
            r#"
            SELECT id, booking_number, user_id, quote_id, invoice_id, service_type, status, start_date, end_date, subtotal, discount, tax, total, driver_id, created_at, updated_at
            FROM bookings
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_invoice(
        conn: &mut PgConnection,
        invoice_id: i64,
    ) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, Booking>(
            r#"
            SELECT id, booking_number, user_id, quote_id, invoice_id, service_type, status, start_date, end_date, subtotal, discount, tax, total, driver_id, created_at, updated_at
            FROM bookings
            WHERE invoice_id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Inserts a booking; the unique `invoice_id` constraint turns a duplicate into `None`.
    pub async fn insert(conn: &mut PgConnection, booking: &NewBooking) -> Result<Option<Booking>> {
        let row = sqlx::query_as::<_, Booking>(
            r#"
            INSERT INTO bookings (booking_number, user_id, quote_id, invoice_id, service_type, status, start_date, end_date, subtotal, discount, tax, total)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (invoice_id) DO NOTHING
            RETURNING id, booking_number, user_id, quote_id, invoice_id, service_type, status, start_date, end_date, subtotal, discount, tax, total, driver_id, created_at, updated_at
            "#,
        )
        .bind(&booking.booking_number)
        .bind(booking.user_id)
        .bind(booking.quote_id)
        .bind(booking.invoice_id)
        .bind(booking.service_type)
        .bind(booking.status)
        .bind(booking.start_date)
        .bind(booking.end_date)
        .bind(booking.subtotal)
        .bind(booking.discount)
        .bind(booking.tax)
        .bind(booking.total)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn update_status(
        conn: &mut PgConnection,
        booking_id: i64,
        status: BookingStatus,
    ) -> Result<Booking> {
        sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, booking_number, user_id, quote_id, invoice_id, service_type, status, start_date, end_date, subtotal, discount, tax, total, driver_id, created_at, updated_at
            "#,
        )
        .bind(booking_id)
        .bind(status)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound(format!("Booking '{}' not found", booking_id)))
    }

    pub async fn update_end_date(
        conn: &mut PgConnection,
        booking_id: i64,
        end_date: NaiveDate,
    ) -> Result<Booking> {
        sqlx::query_as::<_, Booking>(
            r#"
            UPDATE bookings
            SET end_date = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, booking_number, user_id, quote_id, invoice_id, service_type, status, start_date, end_date, subtotal, discount, tax, total, driver_id, created_at, updated_at
            "#,
        )
        .bind(booking_id)
        .bind(end_date)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::NotFound(format!("Booking '{}' not found", booking_id)))
    }

    /// Copies quote line items onto the booking.
    pub async fn insert_line_items(
        conn: &mut PgConnection,
        booking_id: i64,
        items: &[QuoteLineItem],
    ) -> Result<Vec<BookingLineItem>> {
        let mut inserted = Vec::with_capacity(items.len());
        for item in items {
            let row = sqlx::query_as::<_, BookingLineItem>(
                r#"
                INSERT INTO booking_line_items (booking_id, kind, description, quantity, unit_price)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, booking_id, kind, description, quantity, unit_price
                "#,
            )
            .bind(booking_id)
            .bind(item.kind)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .fetch_one(&mut *conn)
            .await
            .map_err(AppError::Database)?;
            inserted.push(row);
        }

        Ok(inserted)
    }

    pub async fn list_line_items(
        conn: &mut PgConnection,
        booking_id: i64,
    ) -> Result<Vec<BookingLineItem>> {
        let rows = sqlx::query_as::<_, BookingLineItem>(
            r#"
            SELECT id, booking_id, kind, description, quantity, unit_price
            FROM booking_line_items
            WHERE booking_id = $1
            ORDER BY id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn append_history(
        conn: &mut PgConnection,
        entry: &NewStatusHistory,
    ) -> Result<BookingStatusHistory> {
        let row = sqlx::query_as::<_, BookingStatusHistory>(
            r#"
            INSERT INTO booking_status_history (booking_id, status, note)
            VALUES ($1, $2, $3)
            RETURNING id, booking_id, status, note, created_at
            "#,
        )
        .bind(entry.booking_id)
        .bind(&entry.status)
        .bind(&entry.note)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list_history(
        conn: &mut PgConnection,
        booking_id: i64,
    ) -> Result<Vec<BookingStatusHistory>> {
        let rows = sqlx::query_as::<_, BookingStatusHistory>(
            r#"
            SELECT id, booking_id, status, note, created_at
            FROM booking_status_history
            WHERE booking_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Approved extension request billed through the given invoice.
    pub async fn find_approved_extension(
        conn: &mut PgConnection,
        invoice_id: i64,
    ) -> Result<Option<ExtensionRequest>> {
        let row = sqlx::query_as::<_, ExtensionRequest>(
            r#"
            SELECT id, booking_id, invoice_id, requested_days, status, created_at
            FROM extension_requests
            WHERE invoice_id = $1 AND status = 'approved'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
