use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::error::AppError;
use crate::services::locking::LockWait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketTypeStatus {
    Active,
    Finished,
}

impl TicketTypeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketTypeStatus::Active => "active",
            TicketTypeStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for TicketTypeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketTypeStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TicketTypeStatus::Active),
            "finished" => Ok(TicketTypeStatus::Finished),
            other => Err(AppError::Validation(format!("unknown ticket type status '{}'", other))),
        }
    }
}

impl TryFrom<String> for TicketTypeStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Категория билетов внутри события (VIP, Regular, ...).
/// `quota` - сколько еще можно продать; меняется только под блокировкой строки.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TicketType {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    /// Цена в минорных единицах валюты
    pub price: i64,
    pub quota: i32,
    #[sqlx(try_from = "String")]
    pub status: TicketTypeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewTicketType {
    pub event_id: i64,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(range(min = 0))]
    pub price: i64,
    #[validate(range(min = 0))]
    pub quota: i32,
}

/// Частичное обновление: `None` - поле не передано, `Some(x)` - перезаписать,
/// даже если `x` нулевое значение.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct TicketTypePatch {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(range(min = 0))]
    pub price: Option<i64>,
    #[validate(range(min = 0))]
    pub quota: Option<i32>,
    pub status: Option<TicketTypeStatus>,
}

impl TicketTypePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.quota.is_none() && self.status.is_none()
    }

    pub fn apply(&self, target: &mut TicketType) {
        if let Some(name) = &self.name {
            target.name = name.clone();
        }
        if let Some(price) = self.price {
            target.price = price;
        }
        if let Some(quota) = self.quota {
            target.quota = quota;
        }
        if let Some(status) = self.status {
            target.status = status;
        }
    }
}

const COLUMNS: &str = "id, event_id, name, price, quota, status, created_at, updated_at";

impl TicketType {
    pub async fn find<'e, E>(executor: E, id: i64) -> sqlx::Result<Option<TicketType>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketType>(&format!("SELECT {} FROM ticket_types WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Блокирует строки в порядке возрастания id. `ids` должны быть уже отсортированы.
    pub async fn lock_many<'e, E>(executor: E, ids: &[i64], wait: LockWait) -> sqlx::Result<Vec<TicketType>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketType>(&format!(
            "SELECT {} FROM ticket_types WHERE id = ANY($1) ORDER BY id {}",
            COLUMNS,
            wait.clause()
        ))
        .bind(ids.to_vec())
        .fetch_all(executor)
        .await
    }

    pub async fn lock_for_event<'e, E>(executor: E, event_id: i64) -> sqlx::Result<Vec<TicketType>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketType>(&format!(
            "SELECT {} FROM ticket_types WHERE event_id = $1 ORDER BY id FOR UPDATE",
            COLUMNS
        ))
        .bind(event_id)
        .fetch_all(executor)
        .await
    }

    pub async fn save_quota<'e, E>(executor: E, id: i64, quota: i32) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("UPDATE ticket_types SET quota = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(quota)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn insert<'e, E>(executor: E, new: &NewTicketType) -> sqlx::Result<TicketType>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketType>(&format!(
            "INSERT INTO ticket_types (event_id, name, price, quota, status)
             VALUES ($1, $2, $3, $4, 'active')
             RETURNING {}",
            COLUMNS
        ))
        .bind(new.event_id)
        .bind(&new.name)
        .bind(new.price)
        .bind(new.quota)
        .fetch_one(executor)
        .await
    }

    pub async fn save<'e, E>(executor: E, ticket_type: &TicketType) -> sqlx::Result<TicketType>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TicketType>(&format!(
            "UPDATE ticket_types
             SET name = $2, price = $3, quota = $4, status = $5, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            COLUMNS
        ))
        .bind(ticket_type.id)
        .bind(&ticket_type.name)
        .bind(ticket_type.price)
        .bind(ticket_type.quota)
        .bind(ticket_type.status.as_str())
        .fetch_one(executor)
        .await
    }

    pub async fn has_paid_bookings<'e, E>(executor: E, id: i64) -> sqlx::Result<bool>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM tickets t
                JOIN bookings b ON b.id = t.booking_id
                WHERE t.ticket_type_id = $1 AND b.status = 'paid'
            )",
        )
        .bind(id)
        .fetch_one(executor)
        .await
    }
}
