use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::User;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by ID")
    }

    /// Atomic get-or-create keyed by Telegram id. A single conditional insert
    /// carries both paths; the update branch refreshes profile fields without
    /// clobbering them with NULLs.
    pub async fn get_or_create(
        &self,
        tg_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (tg_id, username, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tg_id) DO UPDATE SET
                username = COALESCE(excluded.username, users.username),
                first_name = COALESCE(excluded.first_name, users.first_name),
                last_name = COALESCE(excluded.last_name, users.last_name)
            RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(username)
        .bind(first_name)
        .bind(last_name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert user")
    }

    pub async fn mark_trial_used(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE users SET trial_used = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to mark trial used")?;
        Ok(())
    }

}
