use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cache::TtlStore;
use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::payment::GatewayOutcome;
use crate::AppState;

pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

// Сколько помним обработанный колбэк
const CALLBACK_DEDUPE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments", get(list_payments))
        .route("/webhooks/payments", post(payment_webhook))
}

/// Тело колбэка шлюза: id счета и его статус.
#[derive(Debug, Deserialize)]
pub struct PaymentCallback {
    pub id: String,
    pub status: String,
}

/// Сравниваем дайджесты, а не сами строки.
fn callback_token_matches(provided: Option<&str>, expected: &str) -> bool {
    match provided {
        Some(token) if !expected.is_empty() => {
            Sha256::digest(token.as_bytes()) == Sha256::digest(expected.as_bytes())
        }
        _ => false,
    }
}

// GET /api/payments
async fn list_payments(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let payments = state.payments.list_for_buyer(user.user_id).await?;
    Ok(Json(json!({ "success": true, "payments": payments })))
}

// POST /api/webhooks/payments
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let token = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    if !callback_token_matches(token, &state.config.payment.callback_token) {
        warn!("Payment callback with invalid token");
        return Err(AppError::Unauthorized);
    }

    let payload: PaymentCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("invalid callback payload: {}", e)))?;
    let outcome = GatewayOutcome::from_gateway_status(&payload.status)?;

    info!(invoice_id = %payload.id, status = %payload.status, "Webhook received");

    let dedupe_key = format!("callback:{}:{:?}", payload.id, outcome);
    if !state.ttl_store.insert(&dedupe_key, CALLBACK_DEDUPE_TTL).await? {
        info!(invoice_id = %payload.id, "Duplicate callback, already handled");
        return Ok(Json(json!({ "received": true, "result": "duplicate" })));
    }

    match state.payments.apply_gateway_outcome(&payload.id, outcome).await {
        Ok(result) => Ok(Json(json!({ "received": true, "result": result }))),
        Err(AppError::NotFound(what)) => {
            // Неизвестный счет: шлюзу отвечаем 200, чтобы он не ретраил
            warn!(invoice_id = %payload.id, "Callback for unknown {}", what);
            Ok(Json(json!({ "received": true, "result": "ignored" })))
        }
        Err(e) => Err(release_dedupe_key(state.ttl_store.as_ref(), &dedupe_key, e).await),
    }
}

/// Снимает отметку колбэка, чтобы шлюз мог его повторить.
/// Наружу всегда уходит исходная ошибка обработки.
async fn release_dedupe_key(store: &dyn TtlStore, key: &str, cause: AppError) -> AppError {
    if let Err(e) = store.evict(key).await {
        error!(key = %key, error = %e, "Failed to release callback dedupe key");
    }
    cause
}
