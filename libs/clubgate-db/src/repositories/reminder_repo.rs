use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::Reminder;

#[derive(Debug, Clone)]
pub struct ReminderRepository {
    pool: PgPool,
}

impl ReminderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replaces the user's pending reminder batch with a new schedule.
    /// Called on every successful confirmation, so a renewal silently drops
    /// the reminders of the superseded expiry date.
    pub async fn reschedule(
        &self,
        tg_user_id: i64,
        entries: &[(String, DateTime<Utc>)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        sqlx::query("DELETE FROM reminders WHERE tg_user_id = $1 AND sent_at IS NULL")
            .bind(tg_user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to drop pending reminders")?;

        for (kind, due_at) in entries {
            sqlx::query("INSERT INTO reminders (tg_user_id, kind, due_at) VALUES ($1, $2, $3)")
                .bind(tg_user_id)
                .bind(kind)
                .bind(due_at)
                .execute(&mut *tx)
                .await
                .context("Failed to insert reminder")?;
        }

        tx.commit().await.context("Failed to commit reminder schedule")?;
        Ok(())
    }

    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        sqlx::query_as::<_, Reminder>(
            "SELECT * FROM reminders WHERE sent_at IS NULL AND due_at <= $1 ORDER BY due_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch due reminders")
    }

    pub async fn mark_sent(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE reminders SET sent_at = $1 WHERE id = $2")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to mark reminder sent")?;
        Ok(())
    }
}
