use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::payment::{Payment, STATUS_FAILED, STATUS_PAID, STATUS_PENDING};

#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Conditional insert: returns None when a row with the same
    /// `provider_invoice_id` already exists, so callers can treat a repeated
    /// explicit id as "already created" and re-read instead of failing.
    pub async fn try_create(
        &self,
        user_id: i64,
        amount: i64,
        currency: &str,
        plan: &str,
        provider: &str,
        provider_invoice_id: &str,
    ) -> Result<Option<Payment>> {
        sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (user_id, amount, currency, plan, provider, provider_invoice_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (provider_invoice_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(currency)
        .bind(plan)
        .bind(provider)
        .bind(provider_invoice_id)
        .bind(STATUS_PENDING)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to create payment")
    }

    pub async fn get_by_invoice_id(&self, provider_invoice_id: &str) -> Result<Option<Payment>> {
        sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE provider_invoice_id = $1")
            .bind(provider_invoice_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch payment by invoice id")
    }

    /// Flips `pending -> paid` and stamps `paid_at`. Returns false when the
    /// row was not pending anymore, which is how double confirmations are
    /// detected without a read-modify-write race.
    pub async fn mark_paid_if_pending(&self, id: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE payments SET status = $1, paid_at = CURRENT_TIMESTAMP WHERE id = $2 AND status = $3",
        )
        .bind(STATUS_PAID)
        .bind(id)
        .bind(STATUS_PENDING)
        .execute(&self.pool)
        .await
        .context("Failed to mark payment paid")?;
        Ok(res.rows_affected() > 0)
    }

    /// Flips `pending -> failed` after a cancelled or abandoned checkout.
    /// Conditional on `pending` for the same reason as `mark_paid_if_pending`:
    /// a result callback racing the fail redirect must win.
    pub async fn mark_failed_if_pending(&self, id: i64) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE payments SET status = $1 WHERE id = $2 AND status = $3",
        )
        .bind(STATUS_FAILED)
        .bind(id)
        .bind(STATUS_PENDING)
        .execute(&self.pool)
        .await
        .context("Failed to mark payment failed")?;
        Ok(res.rows_affected() > 0)
    }
}
