use crate::error::{AppError, Result};
use crate::models::{DiscrepancyStatus, NewDiscrepancy, SettlementDiscrepancy};
use sqlx::PgConnection;

/// Outbox of charges that succeeded at the gateway without a local commit.
pub struct DiscrepancyRepository;

impl DiscrepancyRepository {
    /// Records a discrepancy. Recording the same gateway transaction twice keeps one row.
    pub async fn insert(
        conn: &mut PgConnection,
        discrepancy: &NewDiscrepancy,
    ) -> Result<SettlementDiscrepancy> {
        let row = sqlx::query_as::<_, SettlementDiscrepancy>(
            r#"
            INSERT INTO settlement_discrepancies (invoice_id, user_id, transaction_id, payment_method_label, amount, reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (transaction_id)
            DO UPDATE SET reason = EXCLUDED.reason, updated_at = NOW()
            RETURNING id, invoice_id, user_id, transaction_id, payment_method_label, amount, reason, status, attempts, created_at, updated_at
            "#,
        )
        .bind(discrepancy.invoice_id)
        .bind(discrepancy.user_id)
        .bind(&discrepancy.transaction_id)
        .bind(&discrepancy.payment_method_label)
        .bind(discrepancy.amount)
        .bind(&discrepancy.reason)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Oldest open discrepancies first. Rows are not claimed; a commit retry is serialized by
    /// the invoice row lock, so overlapping passes settle an invoice at most once.
    pub async fn list_open(
        conn: &mut PgConnection,
        limit: i64,
    ) -> Result<Vec<SettlementDiscrepancy>> {
        let rows = sqlx::query_as::<_, SettlementDiscrepancy>(
            r#"
            SELECT id, invoice_id, user_id, transaction_id, payment_method_label, amount, reason, status, attempts, created_at, updated_at
            FROM settlement_discrepancies
            WHERE status = 'open'
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn record_attempt(
        conn: &mut PgConnection,
        discrepancy_id: i64,
        status: DiscrepancyStatus,
    ) -> Result<SettlementDiscrepancy> {
        sqlx::query_as::<_, SettlementDiscrepancy>(
            r#"
            UPDATE settlement_discrepancies
            SET status = $2, attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING id, invoice_id, user_id, transaction_id, payment_method_label, amount, reason, status, attempts, created_at, updated_at
            "#,
        )
        .bind(discrepancy_id)
        .bind(status)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| {
            AppError::NotFound(format!("Settlement discrepancy '{}' not found", discrepancy_id))
        })
    }
}
