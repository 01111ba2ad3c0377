//! Сверка платежей со шлюзом.
//!
//! 1. `initiate_payment` - проверка брони, выставление счета в шлюзе (без блокировок),
//!    затем `create_payment` под блокировкой брони.
//! 2. `apply_gateway_outcome` - обработка колбэка шлюза. Идемпотентна: повтор того же
//!    итогового статуса ничего не меняет, противоречащий статус только логируется.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::models::{Booking, BookingStatus, Payment, PaymentStatus};
use crate::services::booking::{apply_transition, transition_notification};
use crate::services::gateway::{InvoiceRequest, PaymentGateway};
use crate::services::locking::{LockWait, UnitOfWork};
use crate::services::notifier::{dispatch, Notifier};

/// Итог платежа, нормализованный из сырого статуса шлюза.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayOutcome {
    Paid,
    Failed,
}

impl GatewayOutcome {
    /// PAID/SETTLED -> Paid, FAILED/EXPIRED -> Failed. Остальное (в т.ч. PENDING) - ошибка.
    pub fn from_gateway_status(raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PAID" | "SETTLED" => Ok(GatewayOutcome::Paid),
            "FAILED" | "EXPIRED" => Ok(GatewayOutcome::Failed),
            _ => Err(AppError::Validation(format!("unrecognized gateway status '{}'", raw))),
        }
    }

    pub fn payment_status(self) -> PaymentStatus {
        match self {
            GatewayOutcome::Paid => PaymentStatus::Paid,
            GatewayOutcome::Failed => PaymentStatus::Failed,
        }
    }

    pub fn booking_status(self) -> BookingStatus {
        match self {
            GatewayOutcome::Paid => BookingStatus::Paid,
            GatewayOutcome::Failed => BookingStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied,
    AlreadyApplied,
    Conflicting,
}

/// Что сделать с платежом и бронью при данном колбэке.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReconcilePlan {
    payment: Option<PaymentStatus>,
    booking: Option<BookingStatus>,
    outcome: ReconcileOutcome,
}

fn plan_reconcile(payment: PaymentStatus, booking: BookingStatus, outcome: GatewayOutcome) -> ReconcilePlan {
    let noop = |outcome| ReconcilePlan {
        payment: None,
        booking: None,
        outcome,
    };

    if payment != PaymentStatus::Pending {
        return match (payment, booking, outcome) {
            _ if payment == outcome.payment_status() => noop(ReconcileOutcome::AlreadyApplied),
            // Платеж погашен при истечении брони, но деньги все же пришли
            (PaymentStatus::Failed, BookingStatus::Cancelled, GatewayOutcome::Paid) => ReconcilePlan {
                payment: Some(PaymentStatus::Paid),
                booking: None,
                outcome: ReconcileOutcome::Conflicting,
            },
            _ => noop(ReconcileOutcome::Conflicting),
        };
    }

    match (booking, outcome) {
        (BookingStatus::Pending, _) => ReconcilePlan {
            payment: Some(outcome.payment_status()),
            booking: Some(outcome.booking_status()),
            outcome: ReconcileOutcome::Applied,
        },
        // Бронь уже оплачена другим путем
        (BookingStatus::Paid, GatewayOutcome::Paid) => ReconcilePlan {
            payment: Some(PaymentStatus::Paid),
            booking: None,
            outcome: ReconcileOutcome::Applied,
        },
        (BookingStatus::Paid, GatewayOutcome::Failed) => noop(ReconcileOutcome::Conflicting),
        // Бронь уже отменена (например, sweeper'ом): квоту не трогаем
        (_, GatewayOutcome::Failed) => ReconcilePlan {
            payment: Some(PaymentStatus::Failed),
            booking: None,
            outcome: ReconcileOutcome::Applied,
        },
        // Деньги пришли за отмененную бронь. Фиксируем платеж, бронь не воскрешаем.
        (_, GatewayOutcome::Paid) => ReconcilePlan {
            payment: Some(PaymentStatus::Paid),
            booking: None,
            outcome: ReconcileOutcome::Conflicting,
        },
    }
}

#[derive(Clone)]
pub struct PaymentService {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    config: PaymentConfig,
}

impl PaymentService {
    pub fn new(
        db: Database,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            config,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn PaymentGateway> {
        &self.gateway
    }

    /// Записывает платеж в pending для брони в pending. Квоту не трогает.
    pub async fn create_payment(
        &self,
        booking_id: Uuid,
        invoice_id: &str,
        invoice_url: Option<&str>,
    ) -> AppResult<Payment> {
        let mut uow = UnitOfWork::begin(&self.db).await?;
        let booking = uow.lock_booking(booking_id, LockWait::Block).await?;

        if booking.status != BookingStatus::Pending {
            return Err(AppError::Conflict(format!(
                "booking {} is {}, payment is not possible",
                booking_id, booking.status
            )));
        }
        if uow.lock_payment(booking_id, LockWait::Block).await?.is_some() {
            return Err(AppError::Conflict(format!("booking {} already has a payment", booking_id)));
        }

        let payment = Payment::insert(uow.conn(), booking_id, invoice_id, invoice_url, booking.total_amount).await?;
        uow.commit().await?;

        info!(
            booking_id = %booking_id,
            invoice_id = %invoice_id,
            amount = payment.amount,
            "💳 Payment created"
        );
        Ok(payment)
    }

    /// Выставляет счет в шлюзе и записывает платеж. Шлюз вызывается до любых блокировок.
    /// Повторный вызов для брони с pending-платежом возвращает существующий платеж.
    pub async fn initiate_payment(&self, booking_id: Uuid, caller_id: Uuid, privileged: bool) -> AppResult<Payment> {
        let booking = Booking::find(&self.db.pool, booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("booking {}", booking_id)))?;

        if !privileged && booking.buyer_id != caller_id {
            return Err(AppError::Forbidden("booking belongs to another buyer".into()));
        }
        if booking.status != BookingStatus::Pending {
            return Err(AppError::Conflict(format!("booking {} is {}", booking_id, booking.status)));
        }
        if let Some(existing) = Payment::find_by_booking(&self.db.pool, booking_id).await? {
            if existing.status == PaymentStatus::Pending {
                return Ok(existing);
            }
            return Err(AppError::Conflict(format!(
                "booking {} already has a {} payment",
                booking_id, existing.status
            )));
        }

        let request = InvoiceRequest {
            external_id: booking.id.to_string(),
            amount: booking.total_amount,
            currency: self.config.currency.clone(),
            description: format!("Payment for booking {}", booking.id),
            success_redirect_url: self.config.success_url.clone(),
            failure_redirect_url: self.config.failure_url.clone(),
        };
        let invoice = self.gateway.create_invoice(&request).await?;

        self.create_payment(booking_id, &invoice.id, invoice.invoice_url.as_deref())
            .await
    }

    /// Применяет итог платежа из колбэка шлюза.
    pub async fn apply_gateway_outcome(&self, invoice_id: &str, outcome: GatewayOutcome) -> AppResult<ReconcileOutcome> {
        let payment = Payment::find_by_invoice(&self.db.pool, invoice_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment for invoice {}", invoice_id)))?;

        let mut uow = UnitOfWork::begin(&self.db).await?;
        let mut graph = uow.lock_booking_graph(payment.booking_id, LockWait::Block).await?;

        let locked_payment = graph
            .payment
            .as_ref()
            .ok_or_else(|| AppError::Internal(format!("payment {} vanished under lock", payment.id)))?;

        let plan = plan_reconcile(locked_payment.status, graph.booking.status, outcome);

        if plan.outcome == ReconcileOutcome::Conflicting {
            warn!(
                invoice_id = %invoice_id,
                booking_id = %payment.booking_id,
                payment_status = %locked_payment.status,
                booking_status = %graph.booking.status,
                outcome = ?outcome,
                "Conflicting gateway outcome"
            );
        }

        if plan.payment.is_none() && plan.booking.is_none() {
            // откат: ничего не меняли
            return Ok(plan.outcome);
        }

        if let Some(status) = plan.payment {
            Payment::set_status(uow.conn(), payment.id, status).await?;
        }

        let mut transition = None;
        if let Some(target) = plan.booking {
            transition = Some(apply_transition(&mut uow, &mut graph, target).await?);
        }

        uow.commit().await?;

        info!(
            invoice_id = %invoice_id,
            booking_id = %payment.booking_id,
            outcome = ?outcome,
            result = ?plan.outcome,
            released = transition.map(|t| t.released).unwrap_or(0),
            "Gateway outcome applied"
        );

        if let Some(t) = transition {
            if let Some(notification) = transition_notification(&graph.booking, t.to) {
                dispatch(self.notifier.clone(), notification);
            }
        }

        Ok(plan.outcome)
    }

    pub async fn list_for_buyer(&self, buyer_id: Uuid) -> AppResult<Vec<Payment>> {
        Ok(Payment::list_for_buyer(&self.db.pool, buyer_id).await?)
    }

    pub async fn list_all(&self, limit: i64, offset: i64) -> AppResult<Vec<Payment>> {
        Ok(Payment::list(&self.db.pool, limit.clamp(1, 500), offset.max(0)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_gateway_statuses() {
        assert_eq!(GatewayOutcome::from_gateway_status("PAID").unwrap(), GatewayOutcome::Paid);
        assert_eq!(GatewayOutcome::from_gateway_status("settled").unwrap(), GatewayOutcome::Paid);
        assert_eq!(GatewayOutcome::from_gateway_status("EXPIRED").unwrap(), GatewayOutcome::Failed);
        assert_eq!(GatewayOutcome::from_gateway_status(" failed ").unwrap(), GatewayOutcome::Failed);
    }

    #[test]
    fn unknown_statuses_are_rejected() {
        for raw in ["PENDING", "", "REFUNDED", "paid!"] {
            assert!(matches!(
                GatewayOutcome::from_gateway_status(raw),
                Err(AppError::Validation(_))
            ));
        }
    }

    #[test]
    fn outcome_maps_to_terminal_states() {
        assert_eq!(GatewayOutcome::Paid.booking_status(), BookingStatus::Paid);
        assert_eq!(GatewayOutcome::Failed.booking_status(), BookingStatus::Cancelled);
        assert_eq!(GatewayOutcome::Failed.payment_status(), PaymentStatus::Failed);
    }

    #[test]
    fn first_callback_applies() {
        let plan = plan_reconcile(PaymentStatus::Pending, BookingStatus::Pending, GatewayOutcome::Paid);
        assert_eq!(plan.payment, Some(PaymentStatus::Paid));
        assert_eq!(plan.booking, Some(BookingStatus::Paid));
        assert_eq!(plan.outcome, ReconcileOutcome::Applied);

        let plan = plan_reconcile(PaymentStatus::Pending, BookingStatus::Pending, GatewayOutcome::Failed);
        assert_eq!(plan.booking, Some(BookingStatus::Cancelled));
    }

    #[test]
    fn duplicate_callback_is_a_noop() {
        let plan = plan_reconcile(PaymentStatus::Paid, BookingStatus::Paid, GatewayOutcome::Paid);
        assert_eq!(plan.payment, None);
        assert_eq!(plan.booking, None);
        assert_eq!(plan.outcome, ReconcileOutcome::AlreadyApplied);

        let plan = plan_reconcile(PaymentStatus::Failed, BookingStatus::Cancelled, GatewayOutcome::Failed);
        assert_eq!(plan.outcome, ReconcileOutcome::AlreadyApplied);
    }

    #[test]
    fn contradicting_callback_changes_nothing() {
        let plan = plan_reconcile(PaymentStatus::Paid, BookingStatus::Paid, GatewayOutcome::Failed);
        assert_eq!(plan.payment, None);
        assert_eq!(plan.booking, None);
        assert_eq!(plan.outcome, ReconcileOutcome::Conflicting);
    }

    #[test]
    fn payment_after_expiry_is_recorded_but_booking_stays_cancelled() {
        let plan = plan_reconcile(PaymentStatus::Pending, BookingStatus::Cancelled, GatewayOutcome::Paid);
        assert_eq!(plan.payment, Some(PaymentStatus::Paid));
        assert_eq!(plan.booking, None);
        assert_eq!(plan.outcome, ReconcileOutcome::Conflicting);

        let plan = plan_reconcile(PaymentStatus::Failed, BookingStatus::Cancelled, GatewayOutcome::Paid);
        assert_eq!(plan.payment, Some(PaymentStatus::Paid));
        assert_eq!(plan.booking, None);
        assert_eq!(plan.outcome, ReconcileOutcome::Conflicting);

        let plan = plan_reconcile(PaymentStatus::Pending, BookingStatus::Cancelled, GatewayOutcome::Failed);
        assert_eq!(plan.payment, Some(PaymentStatus::Failed));
        assert_eq!(plan.booking, None);
        assert_eq!(plan.outcome, ReconcileOutcome::Applied);
    }
}
