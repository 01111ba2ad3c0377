use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::BookingConfig;
use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::models::{Booking, BookingStatus, NewVisitor, Ticket};
use crate::services::ledger::InventoryLedger;
use crate::services::locking::{BookingGraph, LockWait, UnitOfWork};
use crate::services::notifier::{dispatch, Notification, NotificationKind, Notifier};
use crate::services::seat_allocator::allocate_seats;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBookingRequest {
    pub ticket_type_id: i64,
    pub quantity: u32,
    #[validate(nested)]
    pub visitors: Vec<NewVisitor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub tickets: Vec<Ticket>,
}

/// Результат перехода брони: откуда, куда и сколько единиц квоты вернули.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub released: u32,
}

/// Переход брони внутри уже заблокированного графа.
///
/// Проверяет машину состояний, каскадирует статус на билеты и, для cancelled/refunded,
/// возвращает по одной единице квоты за каждый билет, который ее еще держит.
/// Общий для админского пути, вебхука и sweeper'а.
pub(crate) async fn apply_transition(
    uow: &mut UnitOfWork,
    graph: &mut BookingGraph,
    target: BookingStatus,
) -> AppResult<Transition> {
    let from = graph.booking.status;
    from.check_transition(target)?;

    let booking_id = graph.booking.id;
    Booking::set_status(uow.conn(), booking_id, target).await?;

    if let Some(ticket_status) = target.ticket_status() {
        Ticket::cascade_status(uow.conn(), booking_id, ticket_status).await?;
    }

    let mut released = 0u32;
    if target.releases_quota() {
        let to_release: Vec<i64> = graph
            .tickets
            .iter()
            .filter(|t| t.status.holds_releasable_quota())
            .map(|t| t.ticket_type_id)
            .collect();

        for ticket_type_id in &to_release {
            InventoryLedger::release(graph.ticket_type_mut(*ticket_type_id)?, 1);
            released += 1;
        }

        let touched: HashSet<i64> = to_release.into_iter().collect();
        for ticket_type in graph.ticket_types.iter().filter(|tt| touched.contains(&tt.id)) {
            InventoryLedger::persist(uow.conn(), ticket_type).await?;
        }
    }

    graph.booking.status = target;
    if let Some(ticket_status) = target.ticket_status() {
        for ticket in graph.tickets.iter_mut().filter(|t| !t.status.is_final()) {
            ticket.status = ticket_status;
        }
    }

    Ok(Transition {
        from,
        to: target,
        released,
    })
}

pub(crate) fn transition_notification(booking: &Booking, target: BookingStatus) -> Option<Notification> {
    let kind = match target {
        BookingStatus::Pending => return None,
        BookingStatus::Paid => NotificationKind::BookingPaid,
        BookingStatus::Cancelled => NotificationKind::BookingCancelled,
        BookingStatus::Refunded => NotificationKind::BookingRefunded,
    };
    Some(Notification::new(booking.buyer_id, kind, booking.id))
}

#[derive(Clone)]
pub struct BookingService {
    db: Database,
    notifier: Arc<dyn Notifier>,
    config: BookingConfig,
}

impl BookingService {
    pub fn new(db: Database, notifier: Arc<dyn Notifier>, config: BookingConfig) -> Self {
        Self { db, notifier, config }
    }

    fn validate_request(&self, request: &CreateBookingRequest) -> AppResult<()> {
        request.validate()?;

        if request.quantity == 0 {
            return Err(AppError::Validation("quantity must be at least 1".into()));
        }
        if request.quantity > self.config.max_quantity {
            return Err(AppError::Validation(format!(
                "quantity must not exceed {}",
                self.config.max_quantity
            )));
        }
        if request.visitors.len() != request.quantity as usize {
            return Err(AppError::Validation(format!(
                "expected {} visitors, got {}",
                request.quantity,
                request.visitors.len()
            )));
        }

        let mut seen = HashSet::new();
        for visitor in &request.visitors {
            if !seen.insert(visitor.national_id.as_str()) {
                return Err(AppError::Validation(format!(
                    "visitor {} is listed twice",
                    visitor.national_id
                )));
            }
        }
        Ok(())
    }

    /// Создает бронь: блокировка типа (NOWAIT) -> резерв квоты -> бронь -> посетители и билеты.
    /// Любая ошибка до commit откатывает все целиком.
    pub async fn create_booking(&self, buyer_id: Uuid, request: CreateBookingRequest) -> AppResult<BookingDetails> {
        self.validate_request(&request)?;
        let qty = request.quantity;

        let mut uow = UnitOfWork::begin(&self.db).await?;

        let mut ticket_types = uow
            .lock_ticket_types(&[request.ticket_type_id], LockWait::NoWait)
            .await?;
        let ticket_type = ticket_types
            .first_mut()
            .ok_or_else(|| AppError::NotFound(format!("ticket type {}", request.ticket_type_id)))?;

        InventoryLedger::reserve(ticket_type, qty)?;

        let total_amount = ticket_type
            .price
            .checked_mul(i64::from(qty))
            .ok_or_else(|| AppError::Validation("total amount overflows".into()))?;

        let booking = Booking::insert(uow.conn(), buyer_id, qty as i32, total_amount).await?;

        let used = Ticket::used_seats(uow.conn(), ticket_type.id).await?;
        let seats = allocate_seats(&used, qty as usize)?;

        let visitor_ids = uow.upsert_visitors(buyer_id, &request.visitors).await?;

        let mut tickets = Vec::with_capacity(seats.len());
        for (visitor_id, seat) in visitor_ids.into_iter().zip(seats.iter()) {
            let ticket = Ticket::insert(uow.conn(), booking.id, ticket_type.id, visitor_id, seat).await?;
            tickets.push(ticket);
        }

        InventoryLedger::persist(uow.conn(), ticket_type).await?;
        uow.commit().await?;

        info!(
            booking_id = %booking.id,
            buyer_id = %buyer_id,
            ticket_type_id = request.ticket_type_id,
            quantity = qty,
            seats = ?seats,
            "🎫 Booking created"
        );

        let deadline = booking.created_at + ChronoDuration::seconds(self.config.payment_window_secs as i64);
        dispatch(
            self.notifier.clone(),
            Notification::new(buyer_id, NotificationKind::BookingCreated, booking.id).with_deadline(deadline),
        );

        Ok(BookingDetails { booking, tickets })
    }

    /// Административная смена статуса брони.
    pub async fn update_booking_status(&self, booking_id: Uuid, target: BookingStatus) -> AppResult<BookingDetails> {
        let mut uow = UnitOfWork::begin(&self.db).await?;
        let mut graph = uow.lock_booking_graph(booking_id, LockWait::Block).await?;

        let transition = apply_transition(&mut uow, &mut graph, target).await?;
        uow.commit().await?;

        info!(
            booking_id = %booking_id,
            from = %transition.from,
            to = %transition.to,
            released = transition.released,
            "Booking status updated"
        );

        let booking = graph.booking.into_inner();
        if let Some(notification) = transition_notification(&booking, target) {
            dispatch(self.notifier.clone(), notification);
        }

        let tickets = graph.tickets.into_iter().map(|t| t.into_inner()).collect();
        Ok(BookingDetails { booking, tickets })
    }

    pub async fn get_booking(&self, booking_id: Uuid, caller_id: Uuid, privileged: bool) -> AppResult<BookingDetails> {
        let booking = Booking::find(&self.db.pool, booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("booking {}", booking_id)))?;

        if !privileged && booking.buyer_id != caller_id {
            warn!(booking_id = %booking_id, caller_id = %caller_id, "Booking access denied");
            return Err(AppError::Forbidden("booking belongs to another buyer".into()));
        }

        let tickets = Ticket::for_booking(&self.db.pool, booking_id).await?;
        Ok(BookingDetails { booking, tickets })
    }

    pub async fn list_for_buyer(&self, buyer_id: Uuid) -> AppResult<Vec<BookingDetails>> {
        let bookings = Booking::list_for_buyer(&self.db.pool, buyer_id).await?;
        self.with_tickets(bookings).await
    }

    pub async fn list_all(&self, status: Option<BookingStatus>, limit: i64, offset: i64) -> AppResult<Vec<BookingDetails>> {
        let bookings = Booking::list(&self.db.pool, status, limit.clamp(1, 500), offset.max(0)).await?;
        self.with_tickets(bookings).await
    }

    async fn with_tickets(&self, bookings: Vec<Booking>) -> AppResult<Vec<BookingDetails>> {
        let ids: Vec<Uuid> = bookings.iter().map(|b| b.id).collect();
        let mut by_booking: BTreeMap<Uuid, Vec<Ticket>> = BTreeMap::new();
        for ticket in Ticket::for_bookings(&self.db.pool, &ids).await? {
            by_booking.entry(ticket.booking_id).or_default().push(ticket);
        }

        Ok(bookings
            .into_iter()
            .map(|booking| {
                let tickets = by_booking.remove(&booking.id).unwrap_or_default();
                BookingDetails { booking, tickets }
            })
            .collect())
    }
}
