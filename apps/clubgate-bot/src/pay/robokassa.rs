//! Robokassa signature scheme and pay-link construction.
//!
//! The merchant account carries two shared secrets with distinct roles:
//! password1 signs the outbound payment link, password2 verifies the
//! provider's result callback. The signature base is
//! `login:OutSum:InvId:password[:Shp_key=value ...]` with the `Shp_*`
//! custom fields appended in lexicographic key order.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::config::RobokassaConfig;

pub const SHP_PREFIX: &str = "Shp_";

pub fn signature_base(
    login: &str,
    out_sum: &str,
    inv_id: &str,
    secret: &str,
    custom: &BTreeMap<String, String>,
) -> String {
    let mut base = format!("{login}:{out_sum}:{inv_id}:{secret}");
    for (k, v) in custom {
        base.push(':');
        base.push_str(k);
        base.push('=');
        base.push_str(v);
    }
    base
}

pub fn sign(
    login: &str,
    out_sum: &str,
    inv_id: &str,
    secret: &str,
    custom: &BTreeMap<String, String>,
) -> String {
    let base = signature_base(login, out_sum, inv_id, secret, custom);
    hex::encode(Sha256::digest(base.as_bytes()))
}

/// Picks the `Shp_*` fields out of a raw payload. BTreeMap gives the sorted
/// order the signature base requires, whatever order the request used.
pub fn custom_fields(fields: &HashMap<String, String>) -> BTreeMap<String, String> {
    fields
        .iter()
        .filter(|(k, _)| k.starts_with(SHP_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Outcome of verifying a result callback, carrying enough to answer the
/// provider and to diagnose a mismatch without leaking the secret.
#[derive(Debug)]
pub struct ResultCheck {
    pub inv_id: String,
    pub out_sum: String,
    pub matches: bool,
    pub computed: String,
    pub provided: String,
}

/// Verifies an inbound result payload against the callback secret
/// (password2). Comparison is case-insensitive over the hex digests.
pub fn verify_result(fields: &HashMap<String, String>, login: &str, secret: &str) -> ResultCheck {
    let out_sum = fields.get("OutSum").cloned().unwrap_or_default();
    let inv_id = fields
        .get("InvId")
        .or_else(|| fields.get("InvoiceID"))
        .cloned()
        .unwrap_or_default();
    let provided = fields
        .get("SignatureValue")
        .cloned()
        .unwrap_or_default()
        .to_ascii_lowercase();

    let computed = sign(login, &out_sum, &inv_id, secret, &custom_fields(fields));
    let matches = !provided.is_empty() && computed.eq_ignore_ascii_case(&provided);

    ResultCheck {
        inv_id,
        out_sum,
        matches,
        computed,
        provided,
    }
}

/// Fixed two-decimal amount rendering; prices are whole currency units.
pub fn out_sum(amount: i64) -> String {
    format!("{amount}.00")
}

/// Random invoice id for a pay link. The provider requires `InvId` to be
/// numeric, so this is the first 8 hex digits of a uuid4 read as a u32 and
/// rendered in decimal.
pub fn new_inv_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    // 8 hex digits always fit a u32.
    u32::from_str_radix(&hex[..8], 16).unwrap_or(1).to_string()
}

pub struct PaymentLinkRequest<'a> {
    pub amount: i64,
    pub inv_id: &'a str,
    pub tg_user_id: i64,
    pub plan: &'a str,
    pub description: &'a str,
    pub recurring: bool,
}

/// Builds the redirect URL to the hosted payment page. The signature is
/// computed with password1 over the amount, invoice id and every `Shp_*`
/// field that ends up in the query.
pub fn build_payment_link(
    cfg: &RobokassaConfig,
    public_base_url: &str,
    req: &PaymentLinkRequest<'_>,
) -> Result<Url> {
    let out_sum = out_sum(req.amount);

    let mut shp = BTreeMap::new();
    shp.insert(format!("{SHP_PREFIX}user"), req.tg_user_id.to_string());
    shp.insert(format!("{SHP_PREFIX}plan"), req.plan.to_string());

    let sig = sign(&cfg.login, &out_sum, req.inv_id, &cfg.password1, &shp);

    let mut url = Url::parse(&cfg.endpoint).context("Bad Robokassa endpoint URL")?;
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("MerchantLogin", &cfg.login);
        q.append_pair("OutSum", &out_sum);
        q.append_pair("InvId", req.inv_id);
        q.append_pair("Description", req.description);
        q.append_pair("IsTest", if cfg.test_mode { "1" } else { "0" });
        q.append_pair("Culture", &cfg.culture);
        q.append_pair("SuccessURL", &format!("{public_base_url}/robokassa/success"));
        q.append_pair("FailURL", &format!("{public_base_url}/robokassa/fail"));
        q.append_pair("ResultURL", &format!("{public_base_url}/robokassa/result"));
        q.append_pair("SignatureValue", &sig);
        for (k, v) in &shp {
            q.append_pair(k, v);
        }
        if req.recurring && cfg.recurring_enabled {
            q.append_pair("Recurring", "true");
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RobokassaConfig {
        RobokassaConfig {
            login: "mlogin".into(),
            password1: "linkpw".into(),
            password2: "secretpw".into(),
            test_mode: true,
            culture: "ru".into(),
            endpoint: "https://auth.robokassa.ru/Merchant/Index.aspx".into(),
            recurring_enabled: false,
        }
    }

    fn sha256_hex(s: &str) -> String {
        hex::encode(Sha256::digest(s.as_bytes()))
    }

    #[test]
    fn base_string_sorts_custom_fields() {
        let mut custom = BTreeMap::new();
        custom.insert("Shp_user".to_string(), "7".to_string());
        custom.insert("Shp_plan".to_string(), "m1".to_string());
        let base = signature_base("mlogin", "990.00", "42", "secretpw", &custom);
        assert_eq!(base, "mlogin:990.00:42:secretpw:Shp_plan=m1:Shp_user=7");
    }

    #[test]
    fn base_string_without_custom_fields_has_no_trailing_colon() {
        let base = signature_base("mlogin", "990.00", "42", "secretpw", &BTreeMap::new());
        assert_eq!(base, "mlogin:990.00:42:secretpw");
    }

    #[test]
    fn sign_is_deterministic() {
        let mut custom = BTreeMap::new();
        custom.insert("Shp_user".to_string(), "7".to_string());
        let a = sign("mlogin", "990.00", "42", "secretpw", &custom);
        let b = sign("mlogin", "990.00", "42", "secretpw", &custom);
        assert_eq!(a, b);
        assert_eq!(a, sha256_hex("mlogin:990.00:42:secretpw:Shp_user=7"));
    }

    #[test]
    fn changing_a_custom_field_changes_the_digest() {
        let mut one = BTreeMap::new();
        one.insert("Shp_plan".to_string(), "m1".to_string());
        let mut other = one.clone();
        other.insert("Shp_plan".to_string(), "m3".to_string());
        assert_ne!(
            sign("mlogin", "990.00", "42", "secretpw", &one),
            sign("mlogin", "990.00", "42", "secretpw", &other)
        );
    }

    #[test]
    fn verify_is_insensitive_to_payload_field_order() {
        // HashMap iteration order differs run to run; the digest must not.
        let expected = sha256_hex("mlogin:990.00:42:secretpw:Shp_plan=m1:Shp_user=7");

        let mut fields = HashMap::new();
        fields.insert("Shp_user".to_string(), "7".to_string());
        fields.insert("OutSum".to_string(), "990.00".to_string());
        fields.insert("Shp_plan".to_string(), "m1".to_string());
        fields.insert("InvId".to_string(), "42".to_string());
        fields.insert("SignatureValue".to_string(), expected.to_uppercase());

        let check = verify_result(&fields, "mlogin", "secretpw");
        assert!(check.matches);
        assert_eq!(check.inv_id, "42");
        assert_eq!(check.out_sum, "990.00");
    }

    #[test]
    fn verify_rejects_a_tampered_amount() {
        let good = sha256_hex("mlogin:990.00:42:secretpw");
        let mut fields = HashMap::new();
        fields.insert("OutSum".to_string(), "1.00".to_string());
        fields.insert("InvId".to_string(), "42".to_string());
        fields.insert("SignatureValue".to_string(), good);
        assert!(!verify_result(&fields, "mlogin", "secretpw").matches);
    }

    #[test]
    fn verify_rejects_missing_signature() {
        let mut fields = HashMap::new();
        fields.insert("OutSum".to_string(), "990.00".to_string());
        fields.insert("InvId".to_string(), "42".to_string());
        assert!(!verify_result(&fields, "mlogin", "secretpw").matches);
    }

    #[test]
    fn verify_accepts_invoice_id_alias() {
        let sig = sha256_hex("mlogin:990.00:42:secretpw");
        let mut fields = HashMap::new();
        fields.insert("OutSum".to_string(), "990.00".to_string());
        fields.insert("InvoiceID".to_string(), "42".to_string());
        fields.insert("SignatureValue".to_string(), sig);
        let check = verify_result(&fields, "mlogin", "secretpw");
        assert!(check.matches);
        assert_eq!(check.inv_id, "42");
    }

    #[test]
    fn out_sum_renders_two_decimals() {
        assert_eq!(out_sum(990), "990.00");
        assert_eq!(out_sum(10), "10.00");
    }

    #[test]
    fn link_invoice_ids_are_numeric() {
        for _ in 0..100 {
            let id = new_inv_id();
            assert!(!id.is_empty());
            assert!(id.chars().all(|c| c.is_ascii_digit()));
            assert!(id.parse::<u32>().is_ok());
        }
    }

    #[test]
    fn payment_link_carries_signature_and_shp_fields() {
        let url = build_payment_link(
            &cfg(),
            "https://club.example.com",
            &PaymentLinkRequest {
                amount: 990,
                inv_id: "abc123",
                tg_user_id: 7,
                plan: "m1",
                description: "Subscription m1",
                recurring: false,
            },
        )
        .unwrap();

        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("MerchantLogin").map(String::as_str), Some("mlogin"));
        assert_eq!(pairs.get("OutSum").map(String::as_str), Some("990.00"));
        assert_eq!(pairs.get("InvId").map(String::as_str), Some("abc123"));
        assert_eq!(pairs.get("Shp_user").map(String::as_str), Some("7"));
        assert_eq!(pairs.get("Shp_plan").map(String::as_str), Some("m1"));
        assert_eq!(
            pairs.get("ResultURL").map(String::as_str),
            Some("https://club.example.com/robokassa/result")
        );
        assert!(!pairs.contains_key("Recurring"));

        // Link signature uses password1 over the Shp fields actually sent.
        let mut shp = BTreeMap::new();
        shp.insert("Shp_plan".to_string(), "m1".to_string());
        shp.insert("Shp_user".to_string(), "7".to_string());
        let expected = sign("mlogin", "990.00", "abc123", "linkpw", &shp);
        assert_eq!(pairs.get("SignatureValue"), Some(&expected));
    }

    #[test]
    fn recurring_flag_requires_the_config_switch() {
        let mut enabled = cfg();
        enabled.recurring_enabled = true;
        let req = PaymentLinkRequest {
            amount: 990,
            inv_id: "abc123",
            tg_user_id: 7,
            plan: "m1",
            description: "Subscription m1",
            recurring: true,
        };

        let off = build_payment_link(&cfg(), "https://x", &req).unwrap();
        assert!(!off.query_pairs().any(|(k, _)| k == "Recurring"));

        let on = build_payment_link(&enabled, "https://x", &req).unwrap();
        let pairs: HashMap<_, _> = on.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("Recurring").map(String::as_str), Some("true"));
    }
}
