use crate::error::{AppError, Result};
use crate::models::Invoice;
use sqlx::PgConnection;

use super::InvoiceLookup;

/// Queries over the `invoices` table. Every method runs on the caller's connection so it
/// participates in the caller's transaction.
pub struct InvoiceRepository;

impl InvoiceRepository {
    /// Finds a payable invoice owned by the user.
    pub async fn find_payable(
        conn: &mut PgConnection,
        lookup: &InvoiceLookup,
        user_id: i64,
    ) -> Result<Option<Invoice>> {
        let row = match lookup {
            InvoiceLookup::Id(id) => {
                sqlx::query_as::<_, Invoice>(
                    r#"
                    SELECT id, user_id, invoice_number, quote_id, booking_id, category, amount, amount_paid, discount, tax, status, payment_method, transaction_id, due_date, paid_at, created_at, updated_at
                    FROM invoices
                    WHERE id = $1 AND user_id = $2 AND status IN ('pending', 'partially_paid')
                    "#,
                )
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await
            }
            InvoiceLookup::Number(number) => {
                sqlx::query_as::<_, Invoice>(
                    r#"
                    SELECT id, user_id, invoice_number, quote_id, booking_id, category, amount, amount_paid, discount, tax, status, payment_method, transaction_id, due_date, paid_at, created_at, updated_at
                    FROM invoices
                    WHERE invoice_number = $1 AND user_id = $2 AND status IN ('pending', 'partially_paid')
                    "#,
                )
                .bind(number)
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await
            }
            InvoiceLookup::Quote(quote_id) => {
                sqlx::query_as::<_, Invoice>(
                    r#"
                    SELECT id, user_id, invoice_number, quote_id, booking_id, category, amount, amount_paid, discount, tax, status, payment_method, transaction_id, due_date, paid_at, created_at, updated_at
                    FROM invoices
                    WHERE quote_id = $1 AND user_id = $2 AND status IN ('pending', 'partially_paid')
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                    "#,
                )
                .bind(quote_id)
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await
            }
        }
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Re-reads a payable invoice and locks the row for the rest of the transaction.
    pub async fn lock_payable(
        conn: &mut PgConnection,
        invoice_id: i64,
        user_id: i64,
    ) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, user_id, invoice_number, quote_id, booking_id, category, amount, amount_paid, discount, tax, status, payment_method, transaction_id, due_date, paid_at, created_at, updated_at
            FROM invoices
            WHERE id = $1 AND user_id = $2 AND status IN ('pending', 'partially_paid')
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(conn: &mut PgConnection, invoice_id: i64) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT id, user_id, invoice_number, quote_id, booking_id, category, amount, amount_paid, discount, tax, status, payment_method, transaction_id, due_date, paid_at, created_at, updated_at
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Marks the invoice paid. The status predicate makes a concurrent second settlement
    /// update zero rows.
    pub async fn mark_paid(
        conn: &mut PgConnection,
        invoice_id: i64,
        payment_method: &str,
        transaction_id: &str,
    ) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices
            SET status = 'paid',
                amount_paid = amount,
                payment_method = $2,
                transaction_id = $3,
                paid_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'partially_paid')
            RETURNING id, user_id, invoice_number, quote_id, booking_id, category, amount, amount_paid, discount, tax, status, payment_method, transaction_id, due_date, paid_at, created_at, updated_at
            "#,
        )
        .bind(invoice_id)
        .bind(payment_method)
        .bind(transaction_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn link_booking(
        conn: &mut PgConnection,
        invoice_id: i64,
        booking_id: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET booking_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(booking_id)
        .execute(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
