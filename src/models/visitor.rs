use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitorTitle {
    Mr,
    Mrs,
    Ms,
}

impl VisitorTitle {
    pub fn as_str(self) -> &'static str {
        match self {
            VisitorTitle::Mr => "mr",
            VisitorTitle::Mrs => "mrs",
            VisitorTitle::Ms => "ms",
        }
    }
}

impl TryFrom<String> for VisitorTitle {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "mr" => Ok(VisitorTitle::Mr),
            "mrs" => Ok(VisitorTitle::Mrs),
            "ms" => Ok(VisitorTitle::Ms),
            other => Err(AppError::Validation(format!("unknown visitor title '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Visitor {
    pub id: Uuid,
    pub buyer_id: Uuid,
    #[sqlx(try_from = "String")]
    pub title: VisitorTitle,
    pub full_name: String,
    pub phone_number: String,
    pub nationality: String,
    pub national_id: String,
    pub created_at: DateTime<Utc>,
}

// Данные посетителя из запроса на бронь
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct NewVisitor {
    pub title: VisitorTitle,
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(length(min = 5, max = 32))]
    pub phone_number: String,
    #[validate(length(min = 2, max = 64))]
    pub nationality: String,
    #[validate(length(min = 4, max = 64))]
    pub national_id: String,
}

impl Visitor {
    /// Находит посетителя по национальному идентификатору или создает нового.
    /// ON CONFLICT, чтобы параллельные брони с одним и тем же новым посетителем не падали.
    /// Данные существующего посетителя не перезаписываются.
    pub async fn upsert<'e, E>(executor: E, buyer_id: Uuid, visitor: &NewVisitor) -> sqlx::Result<Uuid>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO visitors (id, buyer_id, title, full_name, phone_number, nationality, national_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (national_id) DO UPDATE SET national_id = EXCLUDED.national_id
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(buyer_id)
        .bind(visitor.title.as_str())
        .bind(&visitor.full_name)
        .bind(&visitor.phone_number)
        .bind(&visitor.nationality)
        .bind(&visitor.national_id)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_national_id<'e, E>(executor: E, national_id: &str) -> sqlx::Result<Option<Visitor>>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Visitor>(
            "SELECT id, buyer_id, title, full_name, phone_number, nationality, national_id, created_at
             FROM visitors WHERE national_id = $1",
        )
        .bind(national_id)
        .fetch_optional(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_visitor_fields() {
        let visitor: NewVisitor = serde_json::from_value(serde_json::json!({
            "title": "ms",
            "full_name": "Aigerim Sarsen",
            "phone_number": "+77011234567",
            "nationality": "KZ",
            "national_id": "990101400123"
        }))
        .unwrap();
        assert!(visitor.validate().is_ok());

        let bad = NewVisitor {
            full_name: String::new(),
            ..visitor
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn rejects_unknown_title() {
        assert!(VisitorTitle::try_from("dr".to_string()).is_err());
        assert_eq!(VisitorTitle::try_from("mrs".to_string()).unwrap(), VisitorTitle::Mrs);
    }
}
