use crate::error::{AppError, Result};
use crate::models::{Quote, QuoteLineItem};
use sqlx::PgConnection;

/// Read access to priced quotes.
pub struct QuoteRepository;

impl QuoteRepository {
    pub async fn find_by_id(conn: &mut PgConnection, quote_id: i64) -> Result<Option<Quote>> {
        let row = sqlx::query_as::<_, Quote>(
            r#"
            SELECT id, user_id, service_type, status, quoted_price, discount, tax, start_date, end_date, created_at
            FROM quotes
            WHERE id = $1
            "#,
        )
        .bind(quote_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list_line_items(
        conn: &mut PgConnection,
        quote_id: i64,
    ) -> Result<Vec<QuoteLineItem>> {
        let rows = sqlx::query_as::<_, QuoteLineItem>(
            r#"
            SELECT id, quote_id, kind, description, quantity, unit_price
            FROM quote_line_items
            WHERE quote_id = $1
            ORDER BY id
            "#,
        )
        .bind(quote_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn mark_converted(conn: &mut PgConnection, quote_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE quotes
            SET status = 'converted'
            WHERE id = $1
            "#,
        )
        .bind(quote_id)
        .execute(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
