use crate::error::{AppError, Result};
use crate::models::DriverAccessToken;
use sqlx::PgConnection;

pub struct DriverRepository;

impl DriverRepository {
    pub async fn find_token(
        conn: &mut PgConnection,
        token_hash: &str,
    ) -> Result<Option<DriverAccessToken>> {
        let row = sqlx::query_as::<_, DriverAccessToken>(
            r#"
            SELECT id, driver_id, token_hash, expires_at, revoked
            FROM driver_access_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
