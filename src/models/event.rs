use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Active,
    Ongoing,
    Finished,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Active => "active",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EventStatus::Active),
            "ongoing" => Ok(EventStatus::Ongoing),
            "finished" => Ok(EventStatus::Finished),
            other => Err(AppError::Validation(format!("unknown event status '{}'", other))),
        }
    }
}

impl TryFrom<String> for EventStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Событие из каталога. Здесь только читаем capacity и статус.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub capacity: i32,
    #[sqlx(try_from = "String")]
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub async fn find<'e, E>(executor: E, id: i64) -> sqlx::Result<Option<Event>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Event>(
            "SELECT id, name, capacity, status, created_at, updated_at FROM events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Блокирует строку события, чтобы сериализовать изменения квот его типов билетов.
    pub async fn lock<'e, E>(executor: E, id: i64) -> sqlx::Result<Option<Event>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Event>(
            "SELECT id, name, capacity, status, created_at, updated_at
             FROM events WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }
}
