use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::services::payment_service::PaymentError;
use crate::state::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub status: String,
}

/// Generic provider-agnostic receiver used by the fake/manual payment path.
/// Robokassa has its own signed endpoint; this one only honors an explicit
/// `status=paid` for known providers.
pub async fn payments_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Response {
    let provider = payload.provider.to_lowercase();
    let paid = payload.status.to_lowercase() == "paid";

    if !paid || !matches!(provider.as_str(), "fake" | "robokassa" | "rk") {
        return Json(json!({ "ok": true })).into_response();
    }
    let Some(invoice_id) = payload.invoice_id else {
        return Json(json!({ "ok": true })).into_response();
    };

    match state.payments.confirm_payment(&invoice_id).await {
        Ok(_) => {
            info!(invoice_id, provider, "webhook confirmation applied");
            Json(json!({ "ok": true })).into_response()
        }
        Err(e @ (PaymentError::InvoiceNotFound(_) | PaymentError::InvalidInvoiceState(..))) => {
            warn!(invoice_id, "webhook confirmation rejected: {e}");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "ok": false, "error": e.to_string() })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(invoice_id, "webhook confirmation failed: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false, "error": "storage error" })),
            )
                .into_response()
        }
    }
}
