use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::AdminUser;
use crate::models::{BookingStatus, NewTicketType, TicketStatus, TicketTypePatch};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(list_bookings))
        .route("/bookings/{id}/status", patch(update_booking_status))
        .route("/tickets/{id}/status", patch(update_ticket_status))
        .route("/payments", get(list_payments))
        .route("/ticket-types", post(create_ticket_type))
        .route("/ticket-types/{id}", patch(update_ticket_type))
        .route("/events/{id}/sync-ticket-types", post(sync_ticket_types))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Статус приходит строкой, чтобы неизвестное значение давало VALIDATION_ERROR.
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/* ---------- BOOKINGS ---------- */

// GET /api/admin/bookings?status=&limit=&offset=
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<BookingStatus>)
        .transpose()?;

    let bookings = state
        .bookings
        .list_all(
            status,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(json!({ "success": true, "bookings": bookings })))
}

// PATCH /api/admin/bookings/{id}/status
async fn update_booking_status(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> AppResult<impl IntoResponse> {
    let target: BookingStatus = req.status.parse()?;
    let details = state.bookings.update_booking_status(id, target).await?;
    info!(admin_id = %admin.user_id, booking_id = %id, status = %target, "Admin changed booking status");
    Ok(Json(json!({ "success": true, "booking": details })))
}

/* ---------- TICKETS ---------- */

// PATCH /api/admin/tickets/{id}/status
async fn update_ticket_status(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> AppResult<impl IntoResponse> {
    let target: TicketStatus = req.status.parse()?;
    let ticket = state.tickets.update_ticket_status(id, target).await?;
    info!(admin_id = %admin.user_id, ticket_id = %id, status = %target, "Admin changed ticket status");
    Ok(Json(json!({ "success": true, "ticket": ticket })))
}

/* ---------- PAYMENTS ---------- */

// GET /api/admin/payments?limit=&offset=
async fn list_payments(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    let payments = state
        .payments
        .list_all(query.limit.unwrap_or(DEFAULT_PAGE_SIZE), query.offset.unwrap_or(0))
        .await?;
    Ok(Json(json!({ "success": true, "payments": payments })))
}

/* ---------- CATALOG ---------- */

// POST /api/admin/ticket-types
async fn create_ticket_type(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<NewTicketType>,
) -> AppResult<impl IntoResponse> {
    let ticket_type = state.catalog.create_ticket_type(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "ticket_type": ticket_type })),
    ))
}

// PATCH /api/admin/ticket-types/{id}
async fn update_ticket_type(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<i64>,
    Json(patch): Json<TicketTypePatch>,
) -> AppResult<impl IntoResponse> {
    let ticket_type = state.catalog.update_ticket_type(id, patch).await?;
    Ok(Json(json!({ "success": true, "ticket_type": ticket_type })))
}

// POST /api/admin/events/{id}/sync-ticket-types
async fn sync_ticket_types(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(event_id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let changed = state.catalog.sync_ticket_type_status(event_id).await?;
    Ok(Json(json!({ "success": true, "event_id": event_id, "finished": changed })))
}
