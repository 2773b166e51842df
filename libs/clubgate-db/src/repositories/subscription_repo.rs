use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::subscription::{Subscription, STATUS_ACTIVE, STATUS_EXPIRED};

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recently started row regardless of status. Confirmation replay
    /// detection needs the expired history, not just the live row.
    pub async fn latest_for_user(&self, user_id: i64) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY started_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest subscription for user")
    }

    /// Extends the user's live subscription in place, or creates a fresh row
    /// when none is active. Runs in one transaction so two concurrent
    /// confirmations cannot both take the insert path for the same user:
    /// the conditional UPDATE claims the live row, and only a confirmed miss
    /// falls through to INSERT.
    pub async fn create_or_extend(
        &self,
        user_id: i64,
        plan: &str,
        new_expires_at: DateTime<Utc>,
        is_trial: bool,
        auto_renew: bool,
        now: DateTime<Utc>,
    ) -> Result<Subscription> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        let updated = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET plan = $1, started_at = $2, expires_at = $3, is_trial = $4, auto_renew = $5
            WHERE id = (
                SELECT id FROM subscriptions
                WHERE user_id = $6 AND status = $7 AND expires_at > $2
                ORDER BY expires_at DESC
                LIMIT 1
                FOR UPDATE
            )
            RETURNING *
            "#,
        )
        .bind(plan)
        .bind(now)
        .bind(new_expires_at)
        .bind(is_trial)
        .bind(auto_renew)
        .bind(user_id)
        .bind(STATUS_ACTIVE)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to extend subscription")?;

        let sub = match updated {
            Some(sub) => sub,
            None => sqlx::query_as::<_, Subscription>(
                r#"
                INSERT INTO subscriptions (user_id, plan, started_at, expires_at, status, is_trial, auto_renew)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(plan)
            .bind(now)
            .bind(new_expires_at)
            .bind(STATUS_ACTIVE)
            .bind(is_trial)
            .bind(auto_renew)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to create subscription")?,
        };

        tx.commit().await.context("Failed to commit subscription change")?;
        Ok(sub)
    }

    pub async fn has_active_by_tg(&self, tg_user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT s.id FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE u.tg_id = $1 AND s.status = $2 AND s.expires_at > $3
            LIMIT 1
            "#,
        )
        .bind(tg_user_id)
        .bind(STATUS_ACTIVE)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check active subscription by TG ID")?;
        Ok(found.is_some())
    }

    pub async fn current_by_tg(&self, tg_user_id: i64) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT s.* FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE u.tg_id = $1 AND s.status = $2
            ORDER BY s.expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(tg_user_id)
        .bind(STATUS_ACTIVE)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch active subscription by TG ID")
    }

    /// Soft-expires every lapsed active row; returns how many were flipped.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE subscriptions SET status = $1 WHERE status = $2 AND expires_at <= $3",
        )
        .bind(STATUS_EXPIRED)
        .bind(STATUS_ACTIVE)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to expire overdue subscriptions")?;
        Ok(res.rows_affected())
    }
}
