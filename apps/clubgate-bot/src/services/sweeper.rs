use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clubgate_db::repositories::{ReminderRepository, SubscriptionRepository};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::services::access_service::dedupe_pairs;
use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(600);
/// A tick that fires more than this late (process stalled or suspended) is
/// skipped; the next scheduled tick catches up.
const CATCH_UP_GRACE: Duration = Duration::from_secs(60);

/// Background reconciliation loop: expires lapsed subscriptions, revokes
/// access for expired grants, delivers due reminders. One iteration runs at
/// a time by construction - the loop awaits each sweep before the next tick.
pub struct Sweeper {
    state: AppState,
    subs: SubscriptionRepository,
    reminders: ReminderRepository,
}

impl Sweeper {
    pub fn new(state: AppState) -> Self {
        let subs = SubscriptionRepository::new(state.pool.clone());
        let reminders = ReminderRepository::new(state.pool.clone());
        Self {
            state,
            subs,
            reminders,
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!("sweeper started, interval {:?}", SWEEP_INTERVAL);
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick is immediate; do one pass at boot.
        loop {
            tokio::select! {
                scheduled = interval.tick() => {
                    if scheduled.elapsed() > CATCH_UP_GRACE {
                        warn!("sweep tick too late ({:?}), skipping to next", scheduled.elapsed());
                        continue;
                    }
                    if let Err(e) = self.sweep().await {
                        error!("sweep failed: {e:#}");
                    }
                }
                _ = shutdown.recv() => {
                    info!("sweeper received shutdown signal, stopping");
                    return;
                }
            }
        }
    }

    pub async fn sweep(&self) -> Result<()> {
        let now = Utc::now();

        let expired_subs = self.subs.expire_overdue(now).await?;
        if expired_subs > 0 {
            info!(count = expired_subs, "marked lapsed subscriptions expired");
        }

        self.revoke_expired_access().await?;
        self.deliver_due_reminders().await?;

        if let Err(e) = self.state.verify.purge_expired().await {
            warn!("failed to purge stale verification tokens: {e:#}");
        }

        Ok(())
    }

    /// Finds grants past their access deadline and kicks each (user, chat)
    /// pair exactly once. A failing pair is logged and left for the next
    /// sweep; the rest of the batch proceeds.
    async fn revoke_expired_access(&self) -> Result<()> {
        let now = Utc::now();
        let expired = self.state.access.expired_grants(now).await?;
        if expired.is_empty() {
            return Ok(());
        }

        let pairs = dedupe_pairs(&expired);
        info!(grants = expired.len(), pairs = pairs.len(), "revoking expired access");

        // Track per-user outcomes: only fully revoked users get purged, the
        // rest keep their rows so the next sweep retries.
        let mut all_ok: HashMap<i64, bool> = HashMap::new();
        for (tg_user_id, chat_id) in pairs {
            let ok = match self.state.access.revoke_access(chat_id, tg_user_id).await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(tg_user_id, chat_id, error = %e, "revoke attempt errored, continuing");
                    false
                }
            };
            *all_ok.entry(tg_user_id).or_insert(true) &= ok;
        }

        let done: HashSet<i64> = all_ok
            .into_iter()
            .filter_map(|(user, ok)| ok.then_some(user))
            .collect();
        for tg_user_id in done {
            match self.state.access.purge_user(tg_user_id).await {
                Ok(n) => info!(tg_user_id, rows = n, "access revoked, grants purged"),
                Err(e) => warn!(tg_user_id, error = %e, "failed to purge grants"),
            }
        }
        Ok(())
    }

    async fn deliver_due_reminders(&self) -> Result<()> {
        let now = Utc::now();
        let due = self.reminders.due(now).await?;
        for reminder in due {
            let text = reminder_text(&reminder.kind);
            if let Err(e) = self.state.gate.send_message(reminder.tg_user_id, &text).await {
                warn!(
                    tg_user_id = reminder.tg_user_id,
                    kind = %reminder.kind,
                    error = %e,
                    "reminder delivery failed, will retry next sweep"
                );
                continue;
            }
            self.reminders.mark_sent(reminder.id, now).await?;
        }
        Ok(())
    }
}

fn reminder_text(kind: &str) -> String {
    match kind {
        "expiry_3h" => "Your subscription expires in a few hours. Renew now to keep access.".into(),
        "expiry_24h" => "Your subscription expires tomorrow. Renew to keep access.".into(),
        _ => "Your subscription is expiring soon. Renew to keep access.".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_text_covers_known_kinds() {
        assert!(reminder_text("expiry_3h").contains("few hours"));
        assert!(reminder_text("expiry_24h").contains("tomorrow"));
        assert!(reminder_text("expiry_72h").contains("expiring soon"));
    }
}
