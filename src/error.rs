use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Postgres: lock_not_available (FOR UPDATE NOWAIT)
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";
/// Postgres: unique_violation
const PG_UNIQUE_VIOLATION: &str = "23505";
/// Postgres: check_violation
const PG_CHECK_VIOLATION: &str = "23514";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not enough quota: requested {requested}, only {available} left")]
    InsufficientQuota { requested: u32, available: i32 },

    #[error("ticket type {0} is finished")]
    TicketTypeFinished(i64),

    #[error("resource is locked by another request: {0}")]
    Contended(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("seat space exhausted: requested {requested}, only {available} labels left")]
    SeatSpaceExhausted { requested: usize, available: usize },

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("database error")]
    Database(#[source] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            match db_err.code().as_deref() {
                Some(PG_LOCK_NOT_AVAILABLE) => {
                    return AppError::Contended(db_err.message().to_string());
                }
                Some(PG_UNIQUE_VIOLATION) => {
                    let constraint = db_err.constraint().unwrap_or("unique constraint");
                    return AppError::Conflict(format!("duplicate value violates {}", constraint));
                }
                Some(PG_CHECK_VIOLATION) => {
                    let constraint = db_err.constraint().unwrap_or("check constraint");
                    return AppError::Conflict(format!("value violates {}", constraint));
                }
                _ => {}
            }
        }
        AppError::Database(err)
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientQuota { .. } | AppError::TicketTypeFinished(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Contended(_) => StatusCode::LOCKED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::SeatSpaceExhausted { .. }
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::InsufficientQuota { .. } => "INSUFFICIENT_QUOTA",
            AppError::TicketTypeFinished(_) => "TICKET_TYPE_FINISHED",
            AppError::Contended(_) => "CONTENDED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::SeatSpaceExhausted { .. } => "SEAT_SPACE_EXHAUSTED",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Gateway(_) => "GATEWAY_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Только конкуренция за блокировку имеет смысл повторять.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Contended(_) | AppError::RateLimited)
    }

    fn is_fatal(&self) -> bool {
        self.status_code().is_server_error()
    }

    fn log(&self) {
        match self {
            AppError::Database(e) => error!(error = ?e, "Database error"),
            e if e.is_fatal() => error!(error = ?e, "Application error"),
            AppError::Contended(msg) => warn!(message = %msg, "Lock contention"),
            _ => {}
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        self.log();

        // Детали фатальных ошибок только в логах
        let message = match &self {
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "code": self.code(),
            "message": message,
            "retryable": self.is_retryable(),
        }));

        if matches!(self, AppError::Contended(_)) {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_not_retryable() {
        let quota = AppError::InsufficientQuota { requested: 3, available: 1 };
        assert_eq!(quota.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!quota.is_retryable());

        let conflict = AppError::Conflict("booking is already cancelled".into());
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
        assert!(!conflict.is_retryable());
    }

    #[test]
    fn contention_is_retryable_with_retry_after() {
        let err = AppError::Contended("could not obtain lock".into());
        assert!(err.is_retryable());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::LOCKED);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }

    #[test]
    fn row_not_found_is_a_storage_error() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
