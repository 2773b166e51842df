use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};

/// Everything the process reads from the environment, parsed once at boot.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bot_token: String,
    pub database_url: String,

    pub owner_id: Option<i64>,
    pub admins: Vec<i64>,
    /// Where age-verification documents go for moderation. Falls back to the
    /// owner, then the first admin.
    pub age_verify_admin_id: Option<i64>,

    pub content_channel_id: i64,
    pub content_chat_id: i64,
    pub invite_ttl_minutes: i64,

    pub trial_price: i64,
    pub plan_prices: HashMap<String, i64>,
    pub base_currency: String,
    pub payment_provider: String,
    pub auto_renew_default: bool,

    pub robokassa: RobokassaConfig,

    pub public_base_url: String,
    pub webapp_host: String,
    pub webapp_port: u16,
    pub debug_routes: bool,

    pub reminder_hours_before: Vec<i64>,
    pub support_url: String,
}

#[derive(Debug, Clone)]
pub struct RobokassaConfig {
    pub login: String,
    /// Signs outbound pay links.
    pub password1: String,
    /// Verifies inbound result callbacks. Never interchangeable with
    /// `password1`.
    pub password2: String,
    pub test_mode: bool,
    pub culture: String,
    pub endpoint: String,
    pub recurring_enabled: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let owner_id = opt_var("OWNER_ID").map(|v| v.parse()).transpose()
            .context("OWNER_ID must be an integer")?;
        let admins = parse_csv_ints(&opt_var("ADMINS").unwrap_or_default())
            .context("ADMINS must be a comma-separated list of integers")?;

        let age_verify_admin_id = opt_var("AGE_VERIFY_ADMIN_ID")
            .map(|v| v.parse())
            .transpose()
            .context("AGE_VERIFY_ADMIN_ID must be an integer")?
            .or(owner_id)
            .or_else(|| admins.first().copied());

        Ok(Self {
            bot_token: env::var("BOT_TOKEN").context("BOT_TOKEN is not set")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
            owner_id,
            admins,
            age_verify_admin_id,
            content_channel_id: opt_var("CONTENT_CHANNEL_ID")
                .map(|v| v.parse())
                .transpose()
                .context("CONTENT_CHANNEL_ID must be an integer")?
                .unwrap_or(0),
            content_chat_id: opt_var("CONTENT_CHAT_ID")
                .map(|v| v.parse())
                .transpose()
                .context("CONTENT_CHAT_ID must be an integer")?
                .unwrap_or(0),
            invite_ttl_minutes: parse_or("INVITE_TTL_MINUTES", 60)?,
            trial_price: parse_or("TRIAL_PRICE", 10)?,
            plan_prices: parse_price_map(
                &opt_var("PLAN_PRICES").unwrap_or_else(|| "m1:990,m3:2490,m12:8990".into()),
            ),
            base_currency: opt_var("BASE_CURRENCY").unwrap_or_else(|| "RUB".into()),
            payment_provider: opt_var("PAYMENT_PROVIDER").unwrap_or_else(|| "rk".into()),
            auto_renew_default: flag_var("AUTO_RENEW_DEFAULT", true),
            robokassa: RobokassaConfig {
                login: opt_var("ROBOKASSA_LOGIN").unwrap_or_default(),
                password1: opt_var("ROBOKASSA_PASSWORD1").unwrap_or_default(),
                password2: opt_var("ROBOKASSA_PASSWORD2").unwrap_or_default(),
                test_mode: flag_var("ROBOKASSA_TEST", true),
                culture: opt_var("ROBOKASSA_CULTURE").unwrap_or_else(|| "ru".into()),
                endpoint: opt_var("ROBOKASSA_ENDPOINT")
                    .unwrap_or_else(|| "https://auth.robokassa.ru/Merchant/Index.aspx".into()),
                recurring_enabled: flag_var("RK_RECURRING_ENABLED", false),
            },
            public_base_url: opt_var("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_string(),
            webapp_host: opt_var("WEBAPP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            webapp_port: parse_or("WEBAPP_PORT", 8080u16)?,
            debug_routes: flag_var("DEBUG_ROUTES", false),
            reminder_hours_before: parse_csv_ints(
                &opt_var("REMINDERS_HOURS_BEFORE").unwrap_or_else(|| "72,24,3".into()),
            )
            .context("REMINDERS_HOURS_BEFORE must be a comma-separated list of integers")?,
            support_url: opt_var("SUPPORT_URL").unwrap_or_else(|| "https://t.me/support".into()),
        })
    }

    pub fn is_admin(&self, tg_id: i64) -> bool {
        self.owner_id == Some(tg_id) || self.admins.contains(&tg_id)
    }
}

fn opt_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match opt_var(key) {
        Some(v) => v.parse().with_context(|| format!("{key} has an invalid value")),
        None => Ok(default),
    }
}

fn flag_var(key: &str, default: bool) -> bool {
    match opt_var(key).as_deref() {
        Some("1") | Some("true") | Some("yes") | Some("on") => true,
        Some("0") | Some("false") | Some("no") | Some("off") => false,
        _ => default,
    }
}

fn parse_csv_ints(value: &str) -> Result<Vec<i64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<i64>().with_context(|| format!("bad integer {p:?}")))
        .collect()
}

/// "m1:990,m3:2490" -> {m1: 990, m3: 2490}. Malformed pairs are skipped, a
/// bad env var should not take the bot down.
fn parse_price_map(value: &str) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    for pair in value.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((plan, price)) = pair.split_once(':') {
            if let Ok(price) = price.trim().parse::<i64>() {
                map.insert(plan.trim().to_string(), price);
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_map_parses_default() {
        let map = parse_price_map("m1:990,m3:2490,m12:8990");
        assert_eq!(map.get("m1"), Some(&990));
        assert_eq!(map.get("m3"), Some(&2490));
        assert_eq!(map.get("m12"), Some(&8990));
    }

    #[test]
    fn price_map_skips_garbage() {
        let map = parse_price_map("m1:990, bogus ,m3:abc,:5,,m12:8990");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("m1"), Some(&990));
        assert_eq!(map.get("m12"), Some(&8990));
    }

    #[test]
    fn csv_ints_handle_spaces_and_empties() {
        assert_eq!(parse_csv_ints(" 72, 24 ,3,").unwrap(), vec![72, 24, 3]);
        assert!(parse_csv_ints("").unwrap().is_empty());
        assert!(parse_csv_ints("72,x").is_err());
    }
}
