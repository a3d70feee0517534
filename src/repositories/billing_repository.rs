use crate::error::{AppError, Result};
use crate::models::{CustomerBillingProfile, NewPaymentMethod, PaymentMethodReference};
use sqlx::PgConnection;

/// Queries over gateway customer profiles and saved payment methods.
pub struct BillingRepository;

impl BillingRepository {
    pub async fn find_profile(
        conn: &mut PgConnection,
        user_id: i64,
    ) -> Result<Option<CustomerBillingProfile>> {
        let row = sqlx::query_as::<_, CustomerBillingProfile>(
            r#"
            SELECT user_id, external_customer_id, created_at
            FROM customer_billing_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Inserts the profile if the user has none, then returns the stored row. When two first
    /// settlements race, the loser reads back the winner's customer id.
    pub async fn upsert_profile(
        conn: &mut PgConnection,
        user_id: i64,
        external_customer_id: &str,
    ) -> Result<CustomerBillingProfile> {
        sqlx::query(
            r#"
            INSERT INTO customer_billing_profiles (user_id, external_customer_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(external_customer_id)
        .execute(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Self::find_profile(conn, user_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Billing profile for user '{}' not found", user_id))
        })
    }

    pub async fn find_payment_method(
        conn: &mut PgConnection,
        user_id: i64,
        method_id: i64,
    ) -> Result<Option<PaymentMethodReference>> {
        let row = sqlx::query_as::<_, PaymentMethodReference>(
            r#"
            SELECT id, user_id, gateway_method_id, brand, last4, is_default, created_at
            FROM payment_methods
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(method_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Saves a payment method. Saving the same gateway method twice returns the existing row.
    pub async fn insert_payment_method(
        conn: &mut PgConnection,
        method: &NewPaymentMethod,
    ) -> Result<PaymentMethodReference> {
        if method.is_default {
            sqlx::query(
                r#"
                UPDATE payment_methods
                SET is_default = FALSE
                WHERE user_id = $1 AND is_default
                "#,
            )
            .bind(method.user_id)
            .execute(&mut *conn)
            .await
            .map_err(AppError::Database)?;
        }

        let row = sqlx::query_as::<_, PaymentMethodReference>(
            r#"
            INSERT INTO payment_methods (user_id, gateway_method_id, brand, last4, is_default)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, gateway_method_id)
            DO UPDATE SET is_default = EXCLUDED.is_default OR payment_methods.is_default
            RETURNING id, user_id, gateway_method_id, brand, last4, is_default, created_at
            "#,
        )
        .bind(method.user_id)
        .bind(&method.gateway_method_id)
        .bind(&method.brand)
        .bind(&method.last4)
        .bind(method.is_default)
        .fetch_one(&mut *conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
