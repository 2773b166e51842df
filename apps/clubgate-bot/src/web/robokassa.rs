use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::pay::robokassa::verify_result;
use crate::services::payment_service::PaymentError;
use crate::state::AppState;

/// Result URL endpoint. The provider retries on any non-success status, so
/// every branch here is safe to hit repeatedly for the same invoice.
pub async fn rk_result(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let fields = read_fields(&headers, &body, query.as_deref());
    let check = verify_result(
        &fields,
        &state.settings.robokassa.login,
        &state.settings.robokassa.password2,
    );

    if !check.matches {
        warn!(
            inv_id = %check.inv_id,
            out_sum = %check.out_sum,
            provided = %check.provided,
            "robokassa result rejected: bad signature"
        );
        let body = if state.settings.debug_routes {
            format!(
                "bad sign\nInvId={}\nOutSum={}\nsig_in={}\nsig_calc={}\n",
                check.inv_id, check.out_sum, check.provided, check.computed
            )
        } else {
            "bad sign".to_string()
        };
        return (StatusCode::BAD_REQUEST, body).into_response();
    }

    info!(inv_id = %check.inv_id, out_sum = %check.out_sum, "robokassa result verified");

    match state.payments.confirm_payment(&check.inv_id).await {
        Ok(sub) => {
            notify_payer(&state, &fields, &sub.expires_at.to_string()).await;
            (StatusCode::OK, format!("OK{}", check.inv_id)).into_response()
        }
        Err(e @ PaymentError::InvoiceNotFound(_)) => {
            warn!(inv_id = %check.inv_id, "robokassa result: {e}");
            (StatusCode::BAD_REQUEST, "invoice not found".to_string()).into_response()
        }
        Err(e @ PaymentError::InvalidInvoiceState(..)) => {
            warn!(inv_id = %check.inv_id, "robokassa result: {e}");
            (StatusCode::BAD_REQUEST, "invoice not confirmable".to_string()).into_response()
        }
        Err(e) => {
            // Transient; a non-success answer makes the provider try again.
            warn!(inv_id = %check.inv_id, "robokassa result: {e:#}");
            (StatusCode::INTERNAL_SERVER_ERROR, "try later".to_string()).into_response()
        }
    }
}

pub async fn rk_success() -> &'static str {
    "Payment accepted. Return to the bot and press \"Check payment\"."
}

/// Fail redirect. The provider appends InvId/OutSum to the FailURL, which
/// is enough to close out the abandoned invoice; the user lands here after
/// cancelling checkout.
pub async fn rk_fail(State(state): State<AppState>, RawQuery(query): RawQuery) -> &'static str {
    if let Some(inv_id) = fail_invoice_id(query.as_deref()) {
        match state.payments.invoice_failed(&inv_id).await {
            Ok(true) => info!(inv_id = %inv_id, "invoice marked failed after cancelled checkout"),
            Ok(false) => {}
            Err(e) => warn!(inv_id = %inv_id, "could not mark invoice failed: {e:#}"),
        }
    }
    "Payment was not completed. You can retry from the bot."
}

/// `InvId` out of a fail-redirect query string, if present.
fn fail_invoice_id(query: Option<&str>) -> Option<String> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(query?).ok()?;
    pairs
        .into_iter()
        .find(|(k, _)| k == "InvId" || k == "InvoiceID")
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// Best-effort: let the payer know the payment landed. `Shp_user` travels on
/// the pay link exactly for this.
async fn notify_payer(state: &AppState, fields: &HashMap<String, String>, expires_at: &str) {
    let Some(tg_user_id) = fields.get("Shp_user").and_then(|v| v.parse::<i64>().ok()) else {
        return;
    };
    let text = format!(
        "Payment confirmed. Your subscription is active until {expires_at}. \
         Press \"Check payment\" in the bot to get your invite links."
    );
    if let Err(e) = state.gate.send_message(tg_user_id, &text).await {
        warn!(tg_user_id, error = %e, "could not notify payer");
    }
}

/// Tolerant payload reader: JSON body, then form body, then query string.
/// The provider is inconsistent about content types; none of them should
/// 422 a legitimate callback.
pub fn read_fields(
    headers: &HeaderMap,
    body: &[u8],
    query: Option<&str>,
) -> HashMap<String, String> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(body) {
            return map
                .into_iter()
                .map(|(k, v)| {
                    let s = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, s)
                })
                .collect();
        }
    }

    if !body.is_empty() {
        if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            if !pairs.is_empty() {
                return pairs.into_iter().collect();
            }
        }
    }

    query
        .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_form_body() {
        let headers = HeaderMap::new();
        let body = b"OutSum=990.00&InvId=42&SignatureValue=abc&Shp_user=7";
        let fields = read_fields(&headers, body, None);
        assert_eq!(fields.get("OutSum").map(String::as_str), Some("990.00"));
        assert_eq!(fields.get("Shp_user").map(String::as_str), Some("7"));
    }

    #[test]
    fn reads_json_body_with_numeric_values() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = br#"{"OutSum":"990.00","InvId":42,"Shp_plan":"m1"}"#;
        let fields = read_fields(&headers, body, None);
        assert_eq!(fields.get("InvId").map(String::as_str), Some("42"));
        assert_eq!(fields.get("Shp_plan").map(String::as_str), Some("m1"));
    }

    #[test]
    fn falls_back_to_query_string() {
        let headers = HeaderMap::new();
        let fields = read_fields(&headers, b"", Some("OutSum=990.00&InvId=42"));
        assert_eq!(fields.get("InvId").map(String::as_str), Some("42"));
    }

    #[test]
    fn empty_everything_gives_empty_map() {
        let headers = HeaderMap::new();
        assert!(read_fields(&headers, b"", None).is_empty());
    }

    #[test]
    fn fail_redirect_query_yields_invoice_id() {
        assert_eq!(
            fail_invoice_id(Some("OutSum=990.00&InvId=123456&Culture=ru")),
            Some("123456".to_string())
        );
        assert_eq!(
            fail_invoice_id(Some("InvoiceID=42")),
            Some("42".to_string())
        );
        assert_eq!(fail_invoice_id(Some("OutSum=990.00&InvId=")), None);
        assert_eq!(fail_invoice_id(None), None);
    }
}
