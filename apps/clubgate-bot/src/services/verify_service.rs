use anyhow::Result;
use chrono::{Duration, Utc};
use clubgate_db::models::verification::{VerificationToken, STATUS_APPROVED, STATUS_DENIED};
use clubgate_db::repositories::VerificationRepository;
use clubgate_db::sqlx::PgPool;
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::info;

/// Pending tokens die after this long without a moderator decision.
const TOKEN_TTL_HOURS: i64 = 48;
const TOKEN_LEN: usize = 32;

/// Age-verification workflow: a submitted document becomes a durable random
/// token a moderator approves or denies. Survives restarts, unlike an
/// in-process pending set.
pub struct VerifyService {
    tokens: VerificationRepository,
}

pub fn new_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

impl VerifyService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            tokens: VerificationRepository::new(pool),
        }
    }

    pub async fn issue(&self, tg_user_id: i64, file_id: Option<&str>) -> Result<VerificationToken> {
        let token = new_token();
        let expires_at = Utc::now() + Duration::hours(TOKEN_TTL_HOURS);
        let record = self
            .tokens
            .insert(&token, tg_user_id, file_id, expires_at)
            .await?;
        info!(tg_user_id, token = %token, "verification token issued");
        Ok(record)
    }

    /// Returns the user the token belonged to, or None when it was unknown,
    /// expired or already decided.
    pub async fn approve(&self, token: &str) -> Result<Option<i64>> {
        let user = self.tokens.resolve(token, STATUS_APPROVED, Utc::now()).await?;
        if let Some(tg_user_id) = user {
            info!(tg_user_id, token, "verification approved");
        }
        Ok(user)
    }

    pub async fn deny(&self, token: &str) -> Result<Option<i64>> {
        let user = self.tokens.resolve(token, STATUS_DENIED, Utc::now()).await?;
        if let Some(tg_user_id) = user {
            info!(tg_user_id, token, "verification denied");
        }
        Ok(user)
    }

    pub async fn is_verified(&self, tg_user_id: i64) -> Result<bool> {
        self.tokens.is_verified(tg_user_id).await
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.tokens.purge_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn pending_check_respects_ttl() {
        let now = Utc::now();
        let token = VerificationToken {
            token: "t".into(),
            tg_user_id: 7,
            file_id: None,
            status: "pending".into(),
            created_at: now - Duration::hours(TOKEN_TTL_HOURS + 1),
            expires_at: now - Duration::hours(1),
        };
        assert!(!token.is_pending_at(now));
    }
}
