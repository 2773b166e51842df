use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_PAID: &str = "paid";
pub const STATUS_FAILED: &str = "failed";

/// A requested payment, identified towards the provider by
/// `provider_invoice_id`. Rows are created `pending` and only ever move
/// forward (`pending -> paid/failed`), never back and never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub currency: String,
    pub plan: String,
    pub provider_invoice_id: String,
    pub provider: String,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_paid(&self) -> bool {
        self.status == STATUS_PAID
    }
}
