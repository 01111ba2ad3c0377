pub mod admin;
pub mod bookings;
pub mod payment;
pub mod tickets;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(bookings::routes(state))
        .merge(payment::routes())
        .merge(tickets::routes())
        .nest("/admin", admin::routes())
}

/// Полный роутер приложения: служебные маршруты и `/api`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Ticket Inventory API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", routes(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
