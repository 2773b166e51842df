use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clubgate_db::models::payment::Payment;
use clubgate_db::models::Subscription;
use clubgate_db::repositories::{
    PaymentRepository, ReminderRepository, SubscriptionRepository, UserRepository,
};
use clubgate_db::{is_serialization_failure, sqlx::PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::plan::{parse_plan, price_for, Plan};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("invoice {0} not found")]
    InvoiceNotFound(String),
    #[error("invoice {0} is not confirmable: {1}")]
    InvalidInvoiceState(String, String),
    #[error("storage conflict, retry later")]
    StorageConflict(#[source] anyhow::Error),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Matches an external payment notification to local invoice/subscription
/// state and applies the transition exactly once.
pub struct PaymentService {
    settings: Arc<Settings>,
    users: UserRepository,
    payments: PaymentRepository,
    subs: SubscriptionRepository,
    reminders: ReminderRepository,
}

/// Renewal always resets from the confirmation time, deliberately
/// discarding leftover time on an early renewal.
pub fn renewal_expiry(now: DateTime<Utc>, plan: Plan) -> DateTime<Utc> {
    now + Duration::days(plan.duration_days())
}

/// Whether a paid invoice still owes the user its subscription extension.
/// True only when no subscription was started at or after the moment the
/// payment landed, i.e. the process died between mark-paid and extend. A
/// later replay of the same invoice finds a row started after `paid_at`
/// (active or long expired) and must not extend again.
pub fn extension_missing(
    paid_at: Option<DateTime<Utc>>,
    latest_started_at: Option<DateTime<Utc>>,
) -> bool {
    match (paid_at, latest_started_at) {
        (_, None) => true,
        (Some(paid), Some(started)) => started < paid,
        // Paid status without a timestamp: assume the extension ran rather
        // than hand out another period on a replay.
        (None, Some(_)) => false,
    }
}

/// Reminder schedule for a fresh expiry date; offsets already in the past
/// are dropped rather than fired immediately.
pub fn reminder_schedule(
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hours_before: &[i64],
) -> Vec<(String, DateTime<Utc>)> {
    hours_before
        .iter()
        .filter_map(|h| {
            let due = expires_at - Duration::hours(*h);
            (due > now).then(|| (format!("expiry_{h}h"), due))
        })
        .collect()
}

impl PaymentService {
    pub fn new(pool: PgPool, settings: Arc<Settings>) -> Self {
        Self {
            settings,
            users: UserRepository::new(pool.clone()),
            payments: PaymentRepository::new(pool.clone()),
            subs: SubscriptionRepository::new(pool.clone()),
            reminders: ReminderRepository::new(pool),
        }
    }

    /// Creates a pending invoice for a plan. When the caller supplies the
    /// invoice id (so it can match a pay link built around it), a repeated
    /// call with the same id returns the existing row instead of failing on
    /// the unique constraint.
    pub async fn create_invoice(
        &self,
        tg_user_id: i64,
        plan_code: &str,
        provider_invoice_id: Option<&str>,
    ) -> Result<(Payment, String), PaymentError> {
        let invoice_id = provider_invoice_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let user = self.users.get_or_create(tg_user_id, None, None, None).await?;

        let (plan, youth) = parse_plan(plan_code);
        let amount = price_for(
            plan,
            youth,
            &self.settings.plan_prices,
            self.settings.trial_price,
        );

        let mut attempt = 0;
        let payment = loop {
            attempt += 1;
            match self
                .payments
                .try_create(
                    user.id,
                    amount,
                    &self.settings.base_currency,
                    plan_code,
                    &self.settings.payment_provider,
                    &invoice_id,
                )
                .await
            {
                Ok(Some(payment)) => break payment,
                Ok(None) => {
                    // Lost the insert race or the caller retried an explicit
                    // id; the existing row is the answer either way.
                    break self
                        .payments
                        .get_by_invoice_id(&invoice_id)
                        .await?
                        .ok_or_else(|| {
                            PaymentError::InvalidInvoiceState(
                                invoice_id.clone(),
                                "conflicting row vanished".into(),
                            )
                        })?;
                }
                Err(e) if attempt == 1 && is_serialization_failure(&e) => {
                    warn!(invoice_id = %invoice_id, "create_invoice hit a transient conflict, retrying once");
                    continue;
                }
                Err(e) if is_serialization_failure(&e) => {
                    return Err(PaymentError::StorageConflict(e))
                }
                Err(e) => return Err(e.into()),
            }
        };

        info!(
            tg_user_id,
            plan = plan_code,
            amount,
            invoice_id = %invoice_id,
            "invoice created"
        );
        Ok((payment, invoice_id))
    }

    /// Applies a provider payment notification: mark the invoice paid and
    /// extend-or-create the subscription from now. Safe to call any number
    /// of times for the same invoice; only the first confirmation (or a
    /// recovery run that finds no active subscription) extends.
    pub async fn confirm_payment(&self, invoice_id: &str) -> Result<Subscription, PaymentError> {
        let payment = self
            .payments
            .get_by_invoice_id(invoice_id)
            .await?
            .ok_or_else(|| PaymentError::InvoiceNotFound(invoice_id.to_string()))?;

        let user = self
            .users
            .get_by_id(payment.user_id)
            .await?
            .ok_or_else(|| {
                PaymentError::InvalidInvoiceState(invoice_id.to_string(), "no resolvable user".into())
            })?;

        let (plan, _) = parse_plan(&payment.plan);
        let now = Utc::now();

        let freshly_paid = self.mark_paid_retrying(payment.id).await?;
        if !freshly_paid {
            // Not pending anymore. Re-read to see what it settled as.
            let current = self
                .payments
                .get_by_invoice_id(invoice_id)
                .await?
                .ok_or_else(|| PaymentError::InvoiceNotFound(invoice_id.to_string()))?;
            if !current.is_paid() {
                return Err(PaymentError::InvalidInvoiceState(
                    invoice_id.to_string(),
                    format!("status is {}", current.status),
                ));
            }
            if let Some(sub) = self.subs.latest_for_user(user.id).await? {
                if sub.is_active_at(now) {
                    info!(invoice_id, user_id = user.id, "repeat confirmation ignored");
                    return Ok(sub);
                }
                if !extension_missing(current.paid_at, Some(sub.started_at)) {
                    // A subscription was started for this payment and has
                    // since run its course. Replaying the old invoice grants
                    // nothing new.
                    info!(
                        invoice_id,
                        user_id = user.id,
                        "replayed confirmation of a lapsed invoice ignored"
                    );
                    return Ok(sub);
                }
            }
            // Paid invoice that never got its extension: the process died
            // between mark-paid and extend. Fall through and extend.
            warn!(invoice_id, user_id = user.id, "recovering unextended paid invoice");
        }

        let expires_at = renewal_expiry(now, plan);
        let sub = self
            .extend_retrying(user.id, &payment.plan, expires_at, plan.is_trial(), now)
            .await?;

        if plan.is_trial() && !user.trial_used {
            self.users.mark_trial_used(user.id).await?;
        }

        let schedule = reminder_schedule(now, expires_at, &self.settings.reminder_hours_before);
        if let Err(e) = self.reminders.reschedule(user.tg_id, &schedule).await {
            // Reminders are best-effort; the confirmation itself stands.
            warn!(invoice_id, error = %e, "failed to schedule expiry reminders");
        }

        info!(
            invoice_id,
            user_id = user.id,
            plan = %payment.plan,
            expires_at = %sub.expires_at,
            "payment confirmed, subscription extended"
        );
        Ok(sub)
    }

    /// Marks a pending invoice failed after the provider's fail redirect.
    /// Conditional on `pending` so a racing result callback that already
    /// flipped the row to paid is left alone. Returns whether a row flipped.
    pub async fn invoice_failed(&self, invoice_id: &str) -> Result<bool, PaymentError> {
        let payment = self
            .payments
            .get_by_invoice_id(invoice_id)
            .await?
            .ok_or_else(|| PaymentError::InvoiceNotFound(invoice_id.to_string()))?;
        Ok(self.payments.mark_failed_if_pending(payment.id).await?)
    }

    pub async fn user_has_active_subscription(&self, tg_user_id: i64) -> Result<bool, PaymentError> {
        Ok(self.subs.has_active_by_tg(tg_user_id, Utc::now()).await?)
    }

    /// The user's live subscription, if it is still unexpired.
    pub async fn active_subscription(
        &self,
        tg_user_id: i64,
    ) -> Result<Option<Subscription>, PaymentError> {
        let now = Utc::now();
        Ok(self
            .subs
            .current_by_tg(tg_user_id)
            .await?
            .filter(|s| s.is_active_at(now)))
    }

    async fn mark_paid_retrying(&self, payment_id: i64) -> Result<bool, PaymentError> {
        match self.payments.mark_paid_if_pending(payment_id).await {
            Ok(v) => Ok(v),
            Err(e) if is_serialization_failure(&e) => {
                warn!(payment_id, "mark_paid hit a transient conflict, retrying once");
                self.payments
                    .mark_paid_if_pending(payment_id)
                    .await
                    .map_err(|e2| {
                        if is_serialization_failure(&e2) {
                            PaymentError::StorageConflict(e2)
                        } else {
                            PaymentError::Storage(e2)
                        }
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn extend_retrying(
        &self,
        user_id: i64,
        plan_code: &str,
        expires_at: DateTime<Utc>,
        is_trial: bool,
        now: DateTime<Utc>,
    ) -> Result<Subscription, PaymentError> {
        let auto_renew = self.settings.auto_renew_default;
        match self
            .subs
            .create_or_extend(user_id, plan_code, expires_at, is_trial, auto_renew, now)
            .await
        {
            Ok(sub) => Ok(sub),
            Err(e) if is_serialization_failure(&e) => {
                warn!(user_id, "subscription extension conflicted, retrying once");
                self.subs
                    .create_or_extend(user_id, plan_code, expires_at, is_trial, auto_renew, now)
                    .await
                    .map_err(|e2| {
                        if is_serialization_failure(&e2) {
                            PaymentError::StorageConflict(e2)
                        } else {
                            PaymentError::Storage(e2)
                        }
                    })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renewal_resets_from_now_not_old_expiry() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        // A subscription with 10 days left renews to now+30d, not now+40d.
        let expiry = renewal_expiry(now, Plan::M1);
        assert_eq!(expiry, now + Duration::days(30));
    }

    #[test]
    fn renewal_uses_the_plan_duration() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(renewal_expiry(now, Plan::Trial), now + Duration::days(3));
        assert_eq!(renewal_expiry(now, Plan::M12), now + Duration::days(365));
    }

    #[test]
    fn replayed_invoice_after_expiry_owes_no_extension() {
        let paid = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        // The January confirmation started a subscription moments later;
        // it lapsed long ago. A webhook replay in June must not extend.
        let started = paid + Duration::seconds(1);
        assert!(!extension_missing(Some(paid), Some(started)));
    }

    #[test]
    fn crash_between_mark_paid_and_extend_recovers() {
        let paid = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        // Latest row predates the payment: the extension never ran.
        let stale = paid - Duration::days(90);
        assert!(extension_missing(Some(paid), Some(stale)));
        // No subscription at all: same conclusion.
        assert!(extension_missing(Some(paid), None));
    }

    #[test]
    fn paid_without_timestamp_defaults_to_no_extension() {
        let started = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        assert!(!extension_missing(None, Some(started)));
        assert!(extension_missing(None, None));
    }

    #[test]
    fn reminder_schedule_drops_past_offsets() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let expires = now + Duration::days(2); // 48h out
        let entries = reminder_schedule(now, expires, &[72, 24, 3]);
        let kinds: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(kinds, vec!["expiry_24h", "expiry_3h"]);
        assert_eq!(entries[0].1, expires - Duration::hours(24));
    }

    #[test]
    fn reminder_schedule_empty_for_expired_target() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let entries = reminder_schedule(now, now - Duration::hours(1), &[72, 24, 3]);
        assert!(entries.is_empty());
    }
}
