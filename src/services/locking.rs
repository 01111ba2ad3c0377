//! Единый порядок блокировок.
//!
//! Все пути, которые меняют квоту или статус брони, берут строки строго в порядке
//! event -> ticket_types (по возрастанию id) -> booking -> visitors (по возрастанию
//! national_id) -> tickets -> payment.
//! `UnitOfWork` отслеживает достигнутую стадию и не дает взять блокировку
//! более ранней стадии после более поздней, поэтому обратный порядок
//! (и дедлок) нельзя написать случайно.

use sqlx::{PgConnection, Postgres, Transaction};
use std::ops::{Deref, DerefMut};
use tracing::debug;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::models::{Booking, Event, NewVisitor, Payment, Ticket, TicketType, Visitor};

/// Стадии блокировок в порядке захвата.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockStage {
    Open,
    Event,
    TicketTypes,
    Booking,
    Visitors,
    Tickets,
    Payment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Горячий путь: занятая строка сразу дает `Contended`
    NoWait,
    /// Фоновые задачи и вебхуки могут подождать
    Block,
}

impl LockWait {
    pub fn clause(self) -> &'static str {
        match self {
            LockWait::NoWait => "FOR UPDATE NOWAIT",
            LockWait::Block => "FOR UPDATE",
        }
    }
}

/// Значение, прочитанное под блокировкой строки. Создается только `UnitOfWork`.
#[derive(Debug)]
pub struct Locked<T>(T);

impl<T> Locked<T> {
    pub(crate) fn new(value: T) -> Self {
        Locked(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Locked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Locked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Бронь со всем, что от нее зависит, заблокированная в правильном порядке.
#[derive(Debug)]
pub struct BookingGraph {
    pub ticket_types: Vec<Locked<TicketType>>,
    pub booking: Locked<Booking>,
    pub tickets: Vec<Locked<Ticket>>,
    pub payment: Option<Locked<Payment>>,
}

impl BookingGraph {
    pub fn ticket_type_mut(&mut self, id: i64) -> AppResult<&mut Locked<TicketType>> {
        self.ticket_types
            .iter_mut()
            .find(|tt| tt.id == id)
            .ok_or_else(|| AppError::Internal(format!("ticket type {} is not locked", id)))
    }
}

/// Транзакция + стадия блокировок. Drop без `commit` откатывает транзакцию.
pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
    stage: LockStage,
}

impl UnitOfWork {
    pub async fn begin(db: &Database) -> AppResult<Self> {
        let tx = db.pool.begin().await?;
        Ok(UnitOfWork {
            tx,
            stage: LockStage::Open,
        })
    }

    fn advance(&mut self, next: LockStage) -> AppResult<()> {
        self.stage = check_order(self.stage, next)?;
        Ok(())
    }

    /// Соединение транзакции для запросов, которые не берут новых блокировок.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }

    pub async fn lock_event(&mut self, event_id: i64) -> AppResult<Locked<Event>> {
        self.advance(LockStage::Event)?;
        let event = Event::lock(&mut *self.tx, event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event {}", event_id)))?;
        Ok(Locked::new(event))
    }

    /// Все типы билетов события (для проверки суммарной квоты против capacity).
    pub async fn lock_event_ticket_types(&mut self, event_id: i64) -> AppResult<Vec<Locked<TicketType>>> {
        self.advance(LockStage::TicketTypes)?;
        let rows = TicketType::lock_for_event(&mut *self.tx, event_id).await?;
        Ok(rows.into_iter().map(Locked::new).collect())
    }

    pub async fn lock_ticket_types(&mut self, ids: &[i64], wait: LockWait) -> AppResult<Vec<Locked<TicketType>>> {
        self.advance(LockStage::TicketTypes)?;

        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let rows = TicketType::lock_many(&mut *self.tx, &ids, wait).await?;
        if rows.len() != ids.len() {
            let missing: Vec<i64> = ids
                .iter()
                .filter(|id| !rows.iter().any(|row| row.id == **id))
                .copied()
                .collect();
            return Err(AppError::NotFound(format!("ticket type {:?}", missing)));
        }

        debug!(ticket_types = ?ids, ?wait, "Locked ticket types");
        Ok(rows.into_iter().map(Locked::new).collect())
    }

    pub async fn lock_booking(&mut self, booking_id: Uuid, wait: LockWait) -> AppResult<Locked<Booking>> {
        self.advance(LockStage::Booking)?;
        let booking = Booking::lock(&mut *self.tx, booking_id, wait)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("booking {}", booking_id)))?;
        Ok(Locked::new(booking))
    }

    /// Upsert посетителей в порядке national_id: ON CONFLICT берет блокировки строк
    /// и уникального индекса. Id возвращаются в порядке запроса.
    pub async fn upsert_visitors(&mut self, buyer_id: Uuid, visitors: &[NewVisitor]) -> AppResult<Vec<Uuid>> {
        self.advance(LockStage::Visitors)?;

        let mut ids = vec![Uuid::nil(); visitors.len()];
        for index in visitor_lock_order(visitors) {
            ids[index] = Visitor::upsert(&mut *self.tx, buyer_id, &visitors[index]).await?;
        }
        Ok(ids)
    }

    pub async fn lock_tickets(&mut self, booking_id: Uuid, wait: LockWait) -> AppResult<Vec<Locked<Ticket>>> {
        self.advance(LockStage::Tickets)?;
        let tickets = Ticket::lock_for_booking(&mut *self.tx, booking_id, wait).await?;
        Ok(tickets.into_iter().map(Locked::new).collect())
    }

    pub async fn lock_payment(&mut self, booking_id: Uuid, wait: LockWait) -> AppResult<Option<Locked<Payment>>> {
        self.advance(LockStage::Payment)?;
        let payment = Payment::lock_by_booking(&mut *self.tx, booking_id, wait).await?;
        Ok(payment.map(Locked::new))
    }

    /// Блокирует бронь целиком: типы билетов -> бронь -> билеты -> платеж.
    /// Набор типов билетов брони не меняется после создания, поэтому его можно прочитать до блокировок.
    pub async fn lock_booking_graph(&mut self, booking_id: Uuid, wait: LockWait) -> AppResult<BookingGraph> {
        let type_ids = Ticket::ticket_type_ids_for_booking(&mut *self.tx, booking_id).await?;
        let ticket_types = self.lock_ticket_types(&type_ids, wait).await?;
        let booking = self.lock_booking(booking_id, wait).await?;
        let tickets = self.lock_tickets(booking_id, wait).await?;
        let payment = self.lock_payment(booking_id, wait).await?;

        Ok(BookingGraph {
            ticket_types,
            booking,
            tickets,
            payment,
        })
    }

    pub async fn commit(self) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Индексы посетителей по возрастанию national_id.
fn visitor_lock_order(visitors: &[NewVisitor]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..visitors.len()).collect();
    order.sort_by(|a, b| visitors[*a].national_id.cmp(&visitors[*b].national_id));
    order
}

/// Следующая стадия не может быть раньше текущей. Та же стадия - можно.
fn check_order(current: LockStage, next: LockStage) -> AppResult<LockStage> {
    if next < current {
        return Err(AppError::Internal(format!(
            "lock order violation: {:?} requested after {:?}",
            next, current
        )));
    }
    Ok(next)
}
