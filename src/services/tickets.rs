use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::models::{Booking, BookingStatus, Ticket, TicketStatus};
use crate::services::ledger::InventoryLedger;
use crate::services::locking::{LockWait, UnitOfWork};

/// Проверяет ручную смену статуса билета. pending/valid выводятся из брони
/// и вручную не ставятся; used и cancelled окончательные.
fn check_ticket_transition(
    current: TicketStatus,
    booking: BookingStatus,
    target: TicketStatus,
) -> AppResult<()> {
    match target {
        TicketStatus::Pending | TicketStatus::Valid => Err(AppError::Conflict(format!(
            "ticket status {} follows the booking and cannot be set directly",
            target
        ))),
        _ if current.is_final() => Err(AppError::Conflict(format!("ticket is already {}", current))),
        TicketStatus::Used => {
            if current != TicketStatus::Valid || booking != BookingStatus::Paid {
                return Err(AppError::Conflict(format!(
                    "only valid tickets of paid bookings can be checked in (ticket {}, booking {})",
                    current, booking
                )));
            }
            Ok(())
        }
        TicketStatus::Cancelled => Ok(()),
    }
}

#[derive(Clone)]
pub struct TicketService {
    db: Database,
}

impl TicketService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get_ticket(&self, ticket_id: Uuid, caller_id: Uuid, privileged: bool) -> AppResult<Ticket> {
        let ticket = Ticket::find(&self.db.pool, ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket {}", ticket_id)))?;

        if !privileged {
            let booking = Booking::find(&self.db.pool, ticket.booking_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("booking {}", ticket.booking_id)))?;
            if booking.buyer_id != caller_id {
                return Err(AppError::Forbidden("ticket belongs to another buyer".into()));
            }
        }
        Ok(ticket)
    }

    /// Чек-ин (used) или отмена одного билета. Отмена возвращает одну единицу квоты.
    pub async fn update_ticket_status(&self, ticket_id: Uuid, target: TicketStatus) -> AppResult<Ticket> {
        if matches!(target, TicketStatus::Pending | TicketStatus::Valid) {
            return Err(AppError::Conflict(format!(
                "ticket status {} follows the booking and cannot be set directly",
                target
            )));
        }

        let (booking_id, ticket_type_id) = Ticket::ticket_type_id(&self.db.pool, ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("ticket {}", ticket_id)))?;

        let mut uow = UnitOfWork::begin(&self.db).await?;
        let mut graph = uow.lock_booking_graph(booking_id, LockWait::Block).await?;

        let current = graph
            .tickets
            .iter()
            .find(|t| t.id == ticket_id)
            .map(|t| t.status)
            .ok_or_else(|| AppError::NotFound(format!("ticket {}", ticket_id)))?;

        check_ticket_transition(current, graph.booking.status, target)?;

        let updated = match target {
            TicketStatus::Used => Ticket::set_status(uow.conn(), ticket_id, TicketStatus::Used, Some(Utc::now())).await?,
            _ => {
                let ticket_type = graph.ticket_type_mut(ticket_type_id)?;
                InventoryLedger::release(ticket_type, 1);
                InventoryLedger::persist(uow.conn(), ticket_type).await?;
                Ticket::set_status(uow.conn(), ticket_id, TicketStatus::Cancelled, None).await?
            }
        };
        uow.commit().await?;

        info!(ticket_id = %ticket_id, booking_id = %booking_id, status = %updated.status, "Ticket status updated");
        Ok(updated)
    }
}
