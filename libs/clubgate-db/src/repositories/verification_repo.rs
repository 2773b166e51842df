use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::verification::{VerificationToken, STATUS_APPROVED, STATUS_PENDING};

#[derive(Debug, Clone)]
pub struct VerificationRepository {
    pool: PgPool,
}

impl VerificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        token: &str,
        tg_user_id: i64,
        file_id: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<VerificationToken> {
        sqlx::query_as::<_, VerificationToken>(
            r#"
            INSERT INTO verification_tokens (token, tg_user_id, file_id, status, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(token)
        .bind(tg_user_id)
        .bind(file_id)
        .bind(STATUS_PENDING)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert verification token")
    }

    /// Moves a still-pending, unexpired token to its terminal status and
    /// returns the owning user. None means the token was unknown, expired or
    /// already decided.
    pub async fn resolve(
        &self,
        token: &str,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE verification_tokens
            SET status = $1
            WHERE token = $2 AND status = $3 AND expires_at > $4
            RETURNING tg_user_id
            "#,
        )
        .bind(status)
        .bind(token)
        .bind(STATUS_PENDING)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve verification token")
    }

    pub async fn is_verified(&self, tg_user_id: i64) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT token FROM verification_tokens WHERE tg_user_id = $1 AND status = $2 LIMIT 1",
        )
        .bind(tg_user_id)
        .bind(STATUS_APPROVED)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check verification status")?;
        Ok(found.is_some())
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            "DELETE FROM verification_tokens WHERE status = $1 AND expires_at <= $2",
        )
        .bind(STATUS_PENDING)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to purge expired tokens")?;
        Ok(res.rows_affected())
    }
}
