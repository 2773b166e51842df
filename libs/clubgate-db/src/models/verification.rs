use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_DENIED: &str = "denied";

/// One age-verification attempt. The token is the random moderation handle;
/// pending tokens expire after their TTL so a restart never strands the flow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VerificationToken {
    pub token: String,
    pub tg_user_id: i64,
    pub file_id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl VerificationToken {
    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        self.status == STATUS_PENDING && self.expires_at > now
    }
}
