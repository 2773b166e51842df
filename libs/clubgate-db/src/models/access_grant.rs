use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One issued invite link for a (user, chat) pair. `used` flips when the
/// join event for that link is observed; `access_expires_at` is the deadline
/// after which the sweep kicks the user out.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessGrant {
    pub id: i64,
    pub tg_user_id: i64,
    pub chat_id: i64,
    pub invite_link: Option<String>,
    pub invite_expires_at: Option<DateTime<Utc>>,
    pub used: bool,
    pub access_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
