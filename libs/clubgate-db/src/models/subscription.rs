use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_EXPIRED: &str = "expired";

/// At most one `active` row exists per user. Renewal mutates the live row in
/// place, resetting `started_at`/`expires_at`; lapsed rows are flipped to
/// `expired` by the sweep, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub is_trial: bool,
    pub auto_renew: bool,
}

impl Subscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == STATUS_ACTIVE && self.expires_at > now
    }
}
