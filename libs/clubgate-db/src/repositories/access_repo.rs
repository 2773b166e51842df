use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::AccessGrant;

#[derive(Debug, Clone)]
pub struct AccessGrantRepository {
    pool: PgPool,
}

impl AccessGrantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        tg_user_id: i64,
        chat_id: i64,
        invite_link: &str,
        invite_expires_at: DateTime<Utc>,
        access_expires_at: Option<DateTime<Utc>>,
    ) -> Result<AccessGrant> {
        sqlx::query_as::<_, AccessGrant>(
            r#"
            INSERT INTO access_grants (tg_user_id, chat_id, invite_link, invite_expires_at, used, access_expires_at)
            VALUES ($1, $2, $3, $4, FALSE, $5)
            RETURNING *
            "#,
        )
        .bind(tg_user_id)
        .bind(chat_id)
        .bind(invite_link)
        .bind(invite_expires_at)
        .bind(access_expires_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert access grant")
    }

    /// Unused grants for a (user, chat) pair, freshest invite first. The
    /// min-TTL reuse filter is applied by the caller.
    pub async fn recent_unused(&self, tg_user_id: i64, chat_id: i64) -> Result<Vec<AccessGrant>> {
        sqlx::query_as::<_, AccessGrant>(
            r#"
            SELECT * FROM access_grants
            WHERE tg_user_id = $1 AND chat_id = $2 AND used = FALSE AND invite_expires_at IS NOT NULL
            ORDER BY invite_expires_at DESC
            LIMIT 20
            "#,
        )
        .bind(tg_user_id)
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unused grants")
    }

    /// Flips the matching unused grant to used. Returns false when no row
    /// matched, i.e. the link was already consumed.
    pub async fn mark_used(
        &self,
        tg_user_id: i64,
        chat_id: i64,
        invite_link: &str,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE access_grants
            SET used = TRUE, updated_at = CURRENT_TIMESTAMP
            WHERE tg_user_id = $1 AND chat_id = $2 AND invite_link = $3 AND used = FALSE
            "#,
        )
        .bind(tg_user_id)
        .bind(chat_id)
        .bind(invite_link)
        .execute(&self.pool)
        .await
        .context("Failed to mark grant used")?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<AccessGrant>> {
        sqlx::query_as::<_, AccessGrant>(
            "SELECT * FROM access_grants WHERE access_expires_at IS NOT NULL AND access_expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch expired grants")
    }

    /// Drops every grant row of a user after their access was revoked, so a
    /// future payment starts from a clean slate. Returns rows removed.
    pub async fn purge_user(&self, tg_user_id: i64) -> Result<u64> {
        let res = sqlx::query("DELETE FROM access_grants WHERE tg_user_id = $1")
            .bind(tg_user_id)
            .execute(&self.pool)
            .await
            .context("Failed to purge grants for user")?;
        Ok(res.rows_affected())
    }
}
