use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::{rate_limit, AuthUser};
use crate::services::booking::CreateBookingRequest;
use crate::AppState;

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // Лимит только на создание брони и выставление счета
    let limited = from_fn_with_state(state, rate_limit);

    Router::new()
        .route(
            "/bookings",
            post(create_booking).route_layer(limited.clone()).get(list_bookings),
        )
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/payments", post(initiate_payment).route_layer(limited))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> AppResult<impl IntoResponse> {
    let details = state.bookings.create_booking(user.user_id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "booking": details })),
    ))
}

// GET /api/bookings
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let bookings = state.bookings.list_for_buyer(user.user_id).await?;
    Ok(Json(json!({ "success": true, "bookings": bookings })))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let details = state.bookings.get_booking(id, user.user_id, user.is_admin).await?;
    Ok(Json(json!({ "success": true, "booking": details })))
}

/* ---------- PAYMENTS ---------- */

// POST /api/bookings/{id}/payments
async fn initiate_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let payment = state.payments.initiate_payment(id, user.user_id, user.is_admin).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "payment": payment,
            "payment_url": payment.invoice_url,
        })),
    ))
}
