use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::TicketStatus;
use crate::services::locking::LockWait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Paid,
    Cancelled,
    Refunded,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Paid => "paid",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Refunded => "refunded",
        }
    }

    /// cancelled и refunded - поглощающие состояния
    pub fn is_absorbing(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Refunded)
    }

    /// Проверяет переход по машине состояний:
    /// pending -> paid | cancelled | refunded, paid -> cancelled | refunded.
    /// refunded допускается только из paid.
    pub fn check_transition(self, target: BookingStatus) -> AppResult<()> {
        if self.is_absorbing() {
            return Err(AppError::Conflict(format!("booking is already {}", self)));
        }
        if target == BookingStatus::Refunded && self != BookingStatus::Paid {
            return Err(AppError::Conflict(format!(
                "only paid bookings can be refunded, booking is {}",
                self
            )));
        }
        match (self, target) {
            (BookingStatus::Pending, BookingStatus::Paid)
            | (BookingStatus::Pending, BookingStatus::Cancelled)
            | (BookingStatus::Paid, BookingStatus::Cancelled)
            | (BookingStatus::Paid, BookingStatus::Refunded) => Ok(()),
            (from, to) => Err(AppError::Conflict(format!(
                "cannot move booking from {} to {}",
                from, to
            ))),
        }
    }

    /// Во что переходят билеты брони. `None` - билеты не трогаем.
    pub fn ticket_status(self) -> Option<TicketStatus> {
        match self {
            BookingStatus::Pending => None,
            BookingStatus::Paid => Some(TicketStatus::Valid),
            BookingStatus::Cancelled | BookingStatus::Refunded => Some(TicketStatus::Cancelled),
        }
    }

    pub fn releases_quota(self) -> bool {
        self.is_absorbing()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "paid" => Ok(BookingStatus::Paid),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "refunded" => Ok(BookingStatus::Refunded),
            other => Err(AppError::Validation(format!("unknown booking status '{}'", other))),
        }
    }
}

impl TryFrom<String> for BookingStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Booking {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub quantity: i32,
    pub total_amount: i64,
    #[sqlx(try_from = "String")]
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, buyer_id, quantity, total_amount, status, created_at, updated_at";

impl Booking {
    pub async fn insert<'e, E>(
        executor: E,
        buyer_id: Uuid,
        quantity: i32,
        total_amount: i64,
    ) -> sqlx::Result<Booking>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Booking>(&format!(
            "INSERT INTO bookings (id, buyer_id, quantity, total_amount, status)
             VALUES ($1, $2, $3, $4, 'pending')
             RETURNING {}",
            COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(buyer_id)
        .bind(quantity)
        .bind(total_amount)
        .fetch_one(executor)
        .await
    }

    pub async fn find<'e, E>(executor: E, id: Uuid) -> sqlx::Result<Option<Booking>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Booking>(&format!("SELECT {} FROM bookings WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn lock<'e, E>(executor: E, id: Uuid, wait: LockWait) -> sqlx::Result<Option<Booking>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Booking>(&format!(
            "SELECT {} FROM bookings WHERE id = $1 {}",
            COLUMNS,
            wait.clause()
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn set_status<'e, E>(executor: E, id: Uuid, status: BookingStatus) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("UPDATE bookings SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn list_for_buyer<'e, E>(executor: E, buyer_id: Uuid) -> sqlx::Result<Vec<Booking>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Booking>(&format!(
            "SELECT {} FROM bookings WHERE buyer_id = $1 ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(buyer_id)
        .fetch_all(executor)
        .await
    }

    pub async fn list<'e, E>(
        executor: E,
        status: Option<BookingStatus>,
        limit: i64,
        offset: i64,
    ) -> sqlx::Result<Vec<Booking>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Booking>(&format!(
            "SELECT {} FROM bookings
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3",
            COLUMNS
        ))
        .bind(status.map(BookingStatus::as_str))
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
    }

    /// Брони в pending старше `cutoff`. Свежий платеж срок не продлевает.
    pub async fn expired_candidates<'e, E>(
        executor: E,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> sqlx::Result<Vec<Uuid>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM bookings
             WHERE status = 'pending' AND created_at < $1
             ORDER BY created_at
             LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(executor)
        .await
    }
}
