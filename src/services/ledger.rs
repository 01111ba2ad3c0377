use sqlx::PgConnection;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{TicketType, TicketTypeStatus};
use crate::services::locking::Locked;

/// Учет квоты типа билетов.
///
/// Сам блокировок не берет: принимает только `Locked<TicketType>`, то есть строку,
/// которую вызывающий уже держит через `UnitOfWork`. Изменения живут в памяти,
/// пока не вызван `persist` в той же транзакции.
pub struct InventoryLedger;

impl InventoryLedger {
    pub fn reserve(ticket_type: &mut Locked<TicketType>, qty: u32) -> AppResult<()> {
        if ticket_type.status == TicketTypeStatus::Finished {
            return Err(AppError::TicketTypeFinished(ticket_type.id));
        }

        let requested = i32::try_from(qty)
            .map_err(|_| AppError::Validation(format!("quantity {} is too large", qty)))?;
        if ticket_type.quota < requested {
            return Err(AppError::InsufficientQuota {
                requested: qty,
                available: ticket_type.quota,
            });
        }

        ticket_type.quota -= requested;
        debug!(ticket_type_id = ticket_type.id, qty, quota = ticket_type.quota, "Quota reserved");
        Ok(())
    }

    /// Возврат квоты. Не идемпотентен: один вызов на одно событие возврата.
    pub fn release(ticket_type: &mut Locked<TicketType>, qty: u32) {
        let qty = i32::try_from(qty).unwrap_or(i32::MAX);
        ticket_type.quota = ticket_type.quota.saturating_add(qty);
        debug!(ticket_type_id = ticket_type.id, qty, quota = ticket_type.quota, "Quota released");
    }

    pub async fn persist(conn: &mut PgConnection, ticket_type: &Locked<TicketType>) -> AppResult<()> {
        TicketType::save_quota(conn, ticket_type.id, ticket_type.quota).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn locked(quota: i32, status: TicketTypeStatus) -> Locked<TicketType> {
        Locked::new(TicketType {
            id: 7,
            event_id: 1,
            name: "VIP".into(),
            price: 150_000,
            quota,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    #[test]
    fn reserve_decrements_quota() {
        let mut tt = locked(5, TicketTypeStatus::Active);
        InventoryLedger::reserve(&mut tt, 3).unwrap();
        assert_eq!(tt.quota, 2);
    }

    #[test]
    fn reserve_can_drain_to_zero() {
        let mut tt = locked(2, TicketTypeStatus::Active);
        InventoryLedger::reserve(&mut tt, 2).unwrap();
        assert_eq!(tt.quota, 0);
    }

    #[test]
    fn insufficient_quota_leaves_counter_untouched() {
        let mut tt = locked(1, TicketTypeStatus::Active);
        let err = InventoryLedger::reserve(&mut tt, 2).unwrap_err();
        assert!(matches!(err, AppError::InsufficientQuota { requested: 2, available: 1 }));
        assert_eq!(tt.quota, 1);
    }

    #[test]
    fn finished_type_is_checked_before_quota() {
        let mut tt = locked(0, TicketTypeStatus::Finished);
        let err = InventoryLedger::reserve(&mut tt, 1).unwrap_err();
        assert!(matches!(err, AppError::TicketTypeFinished(7)));
    }

    #[test]
    fn reserve_then_release_restores_quota() {
        let mut tt = locked(10, TicketTypeStatus::Active);
        InventoryLedger::reserve(&mut tt, 4).unwrap();
        for _ in 0..4 {
            InventoryLedger::release(&mut tt, 1);
        }
        assert_eq!(tt.quota, 10);
    }

    #[test]
    fn release_works_on_finished_types() {
        let mut tt = locked(0, TicketTypeStatus::Finished);
        InventoryLedger::release(&mut tt, 2);
        assert_eq!(tt.quota, 2);
    }
}
