use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::locking::LockWait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(AppError::Validation(format!("unknown payment status '{}'", other))),
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub invoice_id: String,
    pub invoice_url: Option<String>,
    pub amount: i64,
    #[sqlx(try_from = "String")]
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const COLUMNS: &str = "id, booking_id, invoice_id, invoice_url, amount, status, created_at, updated_at";

impl Payment {
    pub async fn insert<'e, E>(
        executor: E,
        booking_id: Uuid,
        invoice_id: &str,
        invoice_url: Option<&str>,
        amount: i64,
    ) -> sqlx::Result<Payment>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments (id, booking_id, invoice_id, invoice_url, amount, status)
             VALUES ($1, $2, $3, $4, $5, 'pending')
             RETURNING {}",
            COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(booking_id)
        .bind(invoice_id)
        .bind(invoice_url)
        .bind(amount)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_invoice<'e, E>(executor: E, invoice_id: &str) -> sqlx::Result<Option<Payment>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Payment>(&format!("SELECT {} FROM payments WHERE invoice_id = $1", COLUMNS))
            .bind(invoice_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_booking<'e, E>(executor: E, booking_id: Uuid) -> sqlx::Result<Option<Payment>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Payment>(&format!("SELECT {} FROM payments WHERE booking_id = $1", COLUMNS))
            .bind(booking_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn lock_by_booking<'e, E>(executor: E, booking_id: Uuid, wait: LockWait) -> sqlx::Result<Option<Payment>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE booking_id = $1 {}",
            COLUMNS,
            wait.clause()
        ))
        .bind(booking_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn set_status<'e, E>(executor: E, id: Uuid, status: PaymentStatus) -> sqlx::Result<()>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query("UPDATE payments SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn list_for_buyer<'e, E>(executor: E, buyer_id: Uuid) -> sqlx::Result<Vec<Payment>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Payment>(
            "SELECT p.id, p.booking_id, p.invoice_id, p.invoice_url, p.amount, p.status, p.created_at, p.updated_at
             FROM payments p
             JOIN bookings b ON b.id = p.booking_id
             WHERE b.buyer_id = $1
             ORDER BY p.created_at DESC",
        )
        .bind(buyer_id)
        .fetch_all(executor)
        .await
    }

    pub async fn list<'e, E>(executor: E, limit: i64, offset: i64) -> sqlx::Result<Vec<Payment>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
    }

    /// pending-платежи старше `cutoff`, чья бронь уже в поглощающем состоянии
    pub async fn stale_orphans<'e, E>(executor: E, cutoff: DateTime<Utc>, limit: i64) -> sqlx::Result<Vec<Uuid>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT p.id
             FROM payments p
             JOIN bookings b ON b.id = p.booking_id
             WHERE p.status = 'pending'
               AND p.created_at < $1
               AND b.status IN ('cancelled', 'refunded')
             ORDER BY p.created_at
             LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Условное обновление: только если платеж все еще pending.
    pub async fn mark_failed_if_pending<'e, E>(executor: E, id: Uuid) -> sqlx::Result<bool>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE payments SET status = 'failed', updated_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
