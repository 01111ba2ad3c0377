use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::locking::LockWait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Valid,
    Cancelled,
    Used,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Valid => "valid",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Used => "used",
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, TicketStatus::Cancelled | TicketStatus::Used)
    }

    /// Держит ли билет единицу квоты (used - держит, но уже никогда не вернет)
    pub fn holds_releasable_quota(self) -> bool {
        matches!(self, TicketStatus::Pending | TicketStatus::Valid)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TicketStatus::Pending),
            "valid" => Ok(TicketStatus::Valid),
            "cancelled" => Ok(TicketStatus::Cancelled),
            "used" => Ok(TicketStatus::Used),
            other => Err(AppError::Validation(format!("unknown ticket status '{}'", other))),
        }
    }
}

impl TryFrom<String> for TicketStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Ticket {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub ticket_type_id: i64,
    pub visitor_id: Uuid,
    pub seat_label: String,
    #[sqlx(try_from = "String")]
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str =
    "id, booking_id, ticket_type_id, visitor_id, seat_label, status, created_at, checked_in_at";

impl Ticket {
    pub async fn insert<'e, E>(
        executor: E,
        booking_id: Uuid,
        ticket_type_id: i64,
        visitor_id: Uuid,
        seat_label: &str,
    ) -> sqlx::Result<Ticket>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!(
            "INSERT INTO tickets (id, booking_id, ticket_type_id, visitor_id, seat_label, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')
             RETURNING {}",
            COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(booking_id)
        .bind(ticket_type_id)
        .bind(visitor_id)
        .bind(seat_label)
        .fetch_one(executor)
        .await
    }

    /// Места, занятые неотмененными билетами типа. Читать только под блокировкой типа.
    pub async fn used_seats<'e, E>(executor: E, ticket_type_id: i64) -> sqlx::Result<HashSet<String>>
    where
        E: PgExecutor<'e>,
    {
        let labels = sqlx::query_scalar::<_, String>(
            "SELECT seat_label FROM tickets WHERE ticket_type_id = $1 AND status <> 'cancelled'",
        )
        .bind(ticket_type_id)
        .fetch_all(executor)
        .await?;
        Ok(labels.into_iter().collect())
    }

    /// Типы билетов брони. После создания брони не меняются, поэтому читаем без блокировки.
    pub async fn ticket_type_ids_for_booking<'e, E>(executor: E, booking_id: Uuid) -> sqlx::Result<Vec<i64>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT ticket_type_id FROM tickets WHERE booking_id = $1 ORDER BY ticket_type_id",
        )
        .bind(booking_id)
        .fetch_all(executor)
        .await
    }

    pub async fn ticket_type_id<'e, E>(executor: E, id: Uuid) -> sqlx::Result<Option<(Uuid, i64)>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, (Uuid, i64)>("SELECT booking_id, ticket_type_id FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn lock_for_booking<'e, E>(executor: E, booking_id: Uuid, wait: LockWait) -> sqlx::Result<Vec<Ticket>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {} FROM tickets WHERE booking_id = $1 ORDER BY id {}",
            COLUMNS,
            wait.clause()
        ))
        .bind(booking_id)
        .fetch_all(executor)
        .await
    }

    /// Каскад статуса брони на билеты. used и cancelled не трогаем.
    pub async fn cascade_status<'e, E>(executor: E, booking_id: Uuid, status: TicketStatus) -> sqlx::Result<u64>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE tickets SET status = $2
             WHERE booking_id = $1 AND status NOT IN ('used', 'cancelled')",
        )
        .bind(booking_id)
        .bind(status.as_str())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_status<'e, E>(
        executor: E,
        id: Uuid,
        status: TicketStatus,
        checked_in_at: Option<DateTime<Utc>>,
    ) -> sqlx::Result<Ticket>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!(
            "UPDATE tickets SET status = $2, checked_in_at = COALESCE($3, checked_in_at)
             WHERE id = $1
             RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(checked_in_at)
        .fetch_one(executor)
        .await
    }

    pub async fn find<'e, E>(executor: E, id: Uuid) -> sqlx::Result<Option<Ticket>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!("SELECT {} FROM tickets WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn for_booking<'e, E>(executor: E, booking_id: Uuid) -> sqlx::Result<Vec<Ticket>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {} FROM tickets WHERE booking_id = $1 ORDER BY seat_label",
            COLUMNS
        ))
        .bind(booking_id)
        .fetch_all(executor)
        .await
    }

    pub async fn for_bookings<'e, E>(executor: E, booking_ids: &[Uuid]) -> sqlx::Result<Vec<Ticket>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {} FROM tickets WHERE booking_id = ANY($1) ORDER BY booking_id, seat_label",
            COLUMNS
        ))
        .bind(booking_ids.to_vec())
        .fetch_all(executor)
        .await
    }
}
