use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clubgate_db::models::AccessGrant;
use clubgate_db::repositories::AccessGrantRepository;
use clubgate_db::sqlx::PgPool;
use tracing::{info, warn};

use crate::gate::ChatGate;

/// Manages membership of the paid channel/chat: mints one-time invites,
/// records issuance, reuses fresh links, and revokes lapsed access.
pub struct AccessService {
    grants: AccessGrantRepository,
    gate: Arc<dyn ChatGate>,
}

/// Picks the freshest unused link still valid for at least
/// `min_ttl_minutes`, so impatient "check payment" spam does not mint a new
/// invite every time.
pub fn pick_reusable(
    grants: &[AccessGrant],
    now: DateTime<Utc>,
    min_ttl_minutes: i64,
) -> Option<String> {
    let min_expire = now + Duration::minutes(min_ttl_minutes);
    grants
        .iter()
        .filter(|g| !g.used)
        .filter(|g| g.invite_expires_at.map(|t| t > min_expire).unwrap_or(false))
        .max_by_key(|g| g.invite_expires_at)
        .and_then(|g| g.invite_link.clone())
}

/// Collapses a sweep batch to one entry per (user, chat) pair, preserving
/// first-seen order, so each pair is revoked at most once per sweep.
pub fn dedupe_pairs(grants: &[AccessGrant]) -> Vec<(i64, i64)> {
    let mut seen = HashSet::new();
    grants
        .iter()
        .map(|g| (g.tg_user_id, g.chat_id))
        .filter(|pair| seen.insert(*pair))
        .collect()
}

impl AccessService {
    pub fn new(pool: PgPool, gate: Arc<dyn ChatGate>) -> Self {
        Self {
            grants: AccessGrantRepository::new(pool),
            gate,
        }
    }

    /// Mints a single-join invite expiring in `ttl_minutes` and records the
    /// grant. `access_days` sets the revocation deadline; None leaves the
    /// grant outside the sweep's reach.
    pub async fn create_one_time_link(
        &self,
        tg_user_id: i64,
        chat_id: i64,
        ttl_minutes: i64,
        access_days: Option<i64>,
    ) -> Result<String> {
        let now = Utc::now();
        let invite_expires_at = now + Duration::minutes(ttl_minutes);
        let link = self
            .gate
            .create_single_use_invite(chat_id, invite_expires_at)
            .await?;

        let access_expires_at = access_days.map(|d| now + Duration::days(d));
        self.grants
            .insert(tg_user_id, chat_id, &link, invite_expires_at, access_expires_at)
            .await?;

        info!(tg_user_id, chat_id, ttl_minutes, "issued one-time invite");
        Ok(link)
    }

    pub async fn get_unexpired_link(
        &self,
        tg_user_id: i64,
        chat_id: i64,
        min_ttl_minutes: i64,
    ) -> Result<Option<String>> {
        let candidates = self.grants.recent_unused(tg_user_id, chat_id).await?;
        Ok(pick_reusable(&candidates, Utc::now(), min_ttl_minutes))
    }

    /// Reuse a fresh link when one exists, mint otherwise.
    pub async fn link_for(
        &self,
        tg_user_id: i64,
        chat_id: i64,
        ttl_minutes: i64,
        access_days: Option<i64>,
        min_ttl_minutes: i64,
    ) -> Result<String> {
        if let Some(link) = self
            .get_unexpired_link(tg_user_id, chat_id, min_ttl_minutes)
            .await?
        {
            return Ok(link);
        }
        self.create_one_time_link(tg_user_id, chat_id, ttl_minutes, access_days)
            .await
    }

    /// Called on an observed join event. Only the first join per link
    /// flips the grant; later events find nothing to update.
    pub async fn mark_used(&self, tg_user_id: i64, chat_id: i64, invite_link: &str) -> Result<()> {
        let flipped = self.grants.mark_used(tg_user_id, chat_id, invite_link).await?;
        if flipped {
            info!(tg_user_id, chat_id, "invite link consumed");
        }
        Ok(())
    }

    pub async fn is_member(&self, chat_id: i64, tg_user_id: i64) -> Result<bool> {
        self.gate.is_member(chat_id, tg_user_id).await
    }

    /// Ban then immediately unban: old invite links stop working for the
    /// user, but a future valid payment lets them rejoin. Returns false when
    /// Telegram refused (already gone, missing rights) - callers treat that
    /// as a skipped item, not a failure.
    pub async fn revoke_access(&self, chat_id: i64, tg_user_id: i64) -> Result<bool> {
        if let Err(e) = self.gate.ban(chat_id, tg_user_id).await {
            warn!(tg_user_id, chat_id, error = %e, "revoke: ban failed");
            return Ok(false);
        }
        if let Err(e) = self.gate.unban(chat_id, tg_user_id).await {
            warn!(tg_user_id, chat_id, error = %e, "revoke: unban failed");
        }
        Ok(true)
    }

    pub async fn expired_grants(&self, now: DateTime<Utc>) -> Result<Vec<AccessGrant>> {
        self.grants.expired(now).await
    }

    pub async fn purge_user(&self, tg_user_id: i64) -> Result<u64> {
        self.grants.purge_user(tg_user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn grant(
        id: i64,
        tg_user_id: i64,
        chat_id: i64,
        used: bool,
        invite_minutes_left: Option<i64>,
        now: DateTime<Utc>,
    ) -> AccessGrant {
        AccessGrant {
            id,
            tg_user_id,
            chat_id,
            invite_link: Some(format!("https://t.me/+link{id}")),
            invite_expires_at: invite_minutes_left.map(|m| now + Duration::minutes(m)),
            used,
            access_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn reuses_link_with_enough_ttl_left() {
        let now = now();
        let grants = vec![grant(1, 7, 100, false, Some(10), now)];
        assert_eq!(
            pick_reusable(&grants, now, 5),
            Some("https://t.me/+link1".to_string())
        );
    }

    #[test]
    fn rejects_link_about_to_expire() {
        let now = now();
        let grants = vec![grant(1, 7, 100, false, Some(3), now)];
        assert_eq!(pick_reusable(&grants, now, 5), None);
    }

    #[test]
    fn ignores_used_links_and_prefers_freshest() {
        let now = now();
        let grants = vec![
            grant(1, 7, 100, true, Some(50), now),
            grant(2, 7, 100, false, Some(20), now),
            grant(3, 7, 100, false, Some(40), now),
        ];
        assert_eq!(
            pick_reusable(&grants, now, 5),
            Some("https://t.me/+link3".to_string())
        );
    }

    #[test]
    fn sweep_batch_dedupes_user_chat_pairs() {
        let now = now();
        let grants = vec![
            grant(1, 7, 100, true, None, now),
            grant(2, 7, 100, true, None, now),
            grant(3, 7, 200, true, None, now),
            grant(4, 8, 100, true, None, now),
        ];
        assert_eq!(dedupe_pairs(&grants), vec![(7, 100), (7, 200), (8, 100)]);
    }
}
