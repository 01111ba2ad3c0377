use tracing::info;
use validator::Validate;

use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::models::{EventStatus, NewTicketType, TicketType, TicketTypePatch, TicketTypeStatus};
use crate::services::locking::{Locked, UnitOfWork};

/// Квоты типов билетов против вместимости события.
/// Проверяется при создании и изменении типа, не на каждую бронь.
fn check_capacity(capacity: i32, quotas: impl IntoIterator<Item = i32>) -> AppResult<()> {
    let total: i64 = quotas.into_iter().map(i64::from).sum();
    if total > i64::from(capacity) {
        return Err(AppError::Validation(format!(
            "total quota {} exceeds event capacity {}",
            total, capacity
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CatalogService {
    db: Database,
}

impl CatalogService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create_ticket_type(&self, new: NewTicketType) -> AppResult<TicketType> {
        new.validate()?;

        let mut uow = UnitOfWork::begin(&self.db).await?;
        let event = uow.lock_event(new.event_id).await?;
        if event.status == EventStatus::Finished {
            return Err(AppError::Conflict(format!("event {} is finished", event.id)));
        }

        let existing = uow.lock_event_ticket_types(event.id).await?;
        check_capacity(
            event.capacity,
            existing.iter().map(|tt| tt.quota).chain(std::iter::once(new.quota)),
        )?;

        let ticket_type = TicketType::insert(uow.conn(), &new).await?;
        uow.commit().await?;

        info!(
            ticket_type_id = ticket_type.id,
            event_id = ticket_type.event_id,
            quota = ticket_type.quota,
            "Ticket type created"
        );
        Ok(ticket_type)
    }

    /// Частичное обновление. Запрещено, если по типу уже есть оплаченные брони.
    pub async fn update_ticket_type(&self, id: i64, patch: TicketTypePatch) -> AppResult<TicketType> {
        patch.validate()?;
        if patch.is_empty() {
            return Err(AppError::Validation("nothing to update".into()));
        }

        // event_id не меняется, читаем без блокировки, чтобы соблюсти порядок event -> types
        let current = TicketType::find(&self.db.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket type {}", id)))?;

        let mut uow = UnitOfWork::begin(&self.db).await?;
        let event = uow.lock_event(current.event_id).await?;
        let mut siblings = uow.lock_event_ticket_types(event.id).await?;

        if TicketType::has_paid_bookings(uow.conn(), id).await? {
            return Err(AppError::Conflict(format!(
                "ticket type {} already has paid bookings",
                id
            )));
        }

        let target: &mut Locked<TicketType> = siblings
            .iter_mut()
            .find(|tt| tt.id == id)
            .ok_or_else(|| AppError::NotFound(format!("ticket type {}", id)))?;

        patch.apply(target);
        if event.status == EventStatus::Finished {
            target.status = TicketTypeStatus::Finished;
        }
        let updated = TicketType::save(uow.conn(), target).await?;

        check_capacity(event.capacity, siblings.iter().map(|tt| tt.quota))?;
        uow.commit().await?;

        info!(ticket_type_id = id, quota = updated.quota, status = %updated.status, "Ticket type updated");
        Ok(updated)
    }

    /// Если событие завершено, переводит все его типы билетов в finished.
    /// Возвращает число измененных типов.
    pub async fn sync_ticket_type_status(&self, event_id: i64) -> AppResult<usize> {
        let mut uow = UnitOfWork::begin(&self.db).await?;
        let event = uow.lock_event(event_id).await?;
        if event.status != EventStatus::Finished {
            return Ok(0);
        }

        let ticket_types = uow.lock_event_ticket_types(event_id).await?;
        let mut changed = 0;
        for ticket_type in ticket_types
            .into_iter()
            .map(Locked::into_inner)
            .filter(|tt| tt.status != TicketTypeStatus::Finished)
        {
            let mut finished = ticket_type;
            finished.status = TicketTypeStatus::Finished;
            TicketType::save(uow.conn(), &finished).await?;
            changed += 1;
        }
        uow.commit().await?;

        if changed > 0 {
            info!(event_id, changed, "Ticket types finished with their event");
        }
        Ok(changed)
    }
}
