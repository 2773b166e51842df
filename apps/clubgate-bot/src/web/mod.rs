pub mod robokassa;
pub mod routes;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/payments/webhook", post(routes::payments_webhook))
        .route("/robokassa/result", post(robokassa::rk_result))
        .route("/robokassa/success", get(robokassa::rk_success))
        .route("/robokassa/fail", get(robokassa::rk_fail))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    state: AppState,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!(
        "{}:{}",
        state.settings.webapp_host, state.settings.webapp_port
    );
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("webhook server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .context("Webhook server failed")?;
    Ok(())
}
