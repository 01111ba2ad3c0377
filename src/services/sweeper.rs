use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::SweeperConfig;
use crate::database::Database;
use crate::error::AppResult;
use crate::models::{Booking, BookingStatus, Payment, PaymentStatus};
use crate::services::booking::apply_transition;
use crate::services::locking::{LockWait, UnitOfWork};
use crate::services::notifier::{dispatch, Notification, NotificationKind, Notifier};
use crate::services::payment::{GatewayOutcome, PaymentService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryResult {
    Expired { released: u32 },
    /// Бронь уже ушла из pending, пока мы ждали блокировку
    Skipped,
    /// Шлюз сказал, что счет оплачен: провели как оплату
    ReconciledPaid,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub expired: usize,
    pub skipped: usize,
    pub reconciled_paid: usize,
    pub failed: usize,
    pub released: u64,
    pub orphan_payments: usize,
}

/// Фоновая отмена просроченных броней. Каждая бронь - в своей транзакции.
#[derive(Clone)]
pub struct ExpirySweeper {
    db: Database,
    payments: Arc<PaymentService>,
    notifier: Arc<dyn Notifier>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(
        db: Database,
        payments: Arc<PaymentService>,
        notifier: Arc<dyn Notifier>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            db,
            payments,
            notifier,
            config,
        }
    }

    /// Бесконечный цикл с фиксированным интервалом, не зависит от трафика.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval_secs,
            grace_period_secs = self.config.grace_period_secs,
            "🧹 Expiry sweeper started"
        );
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Sweep failed");
            }
        }
    }

    pub async fn sweep_once(&self) -> AppResult<SweepReport> {
        let cutoff = Utc::now() - self.config.grace_period();
        let mut report = SweepReport::default();

        let candidates = Booking::expired_candidates(&self.db.pool, cutoff, self.config.batch_size).await?;
        report.candidates = candidates.len();

        for booking_id in candidates {
            match self.expire_booking(booking_id).await {
                Ok(ExpiryResult::Expired { released }) => {
                    report.expired += 1;
                    report.released += u64::from(released);
                }
                Ok(ExpiryResult::Skipped) => report.skipped += 1,
                Ok(ExpiryResult::ReconciledPaid) => report.reconciled_paid += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(booking_id = %booking_id, error = %e, "Failed to expire booking");
                }
            }
        }

        report.orphan_payments = self.fail_orphan_payments(cutoff).await?;

        if report.candidates > 0 || report.orphan_payments > 0 {
            info!(?report, "🧹 Sweep completed");
        }
        Ok(report)
    }

    /// Отменяет одну просроченную бронь. Решение принимается после блокировки:
    /// если вебхук успел раньше, бронь уже не pending и мы ее пропускаем.
    pub async fn expire_booking(&self, booking_id: Uuid) -> AppResult<ExpiryResult> {
        if self.config.verify_with_gateway {
            if let Some(result) = self.check_gateway(booking_id).await? {
                return Ok(result);
            }
        }

        let mut uow = UnitOfWork::begin(&self.db).await?;
        let mut graph = uow.lock_booking_graph(booking_id, LockWait::Block).await?;

        if graph.booking.status != BookingStatus::Pending {
            info!(booking_id = %booking_id, status = %graph.booking.status, "Booking already settled, skipping");
            return Ok(ExpiryResult::Skipped);
        }

        let transition = apply_transition(&mut uow, &mut graph, BookingStatus::Cancelled).await?;

        if let Some(payment) = graph.payment.as_ref() {
            if payment.status == PaymentStatus::Pending {
                Payment::set_status(uow.conn(), payment.id, PaymentStatus::Failed).await?;
            }
        }

        uow.commit().await?;

        info!(
            booking_id = %booking_id,
            released = transition.released,
            "⏰ Booking expired"
        );
        dispatch(
            self.notifier.clone(),
            Notification::new(graph.booking.buyer_id, NotificationKind::BookingExpired, booking_id),
        );

        Ok(ExpiryResult::Expired {
            released: transition.released,
        })
    }

    /// Последняя проверка у шлюза перед отменой. Вызывается без блокировок.
    async fn check_gateway(&self, booking_id: Uuid) -> AppResult<Option<ExpiryResult>> {
        let payment = match Payment::find_by_booking(&self.db.pool, booking_id).await? {
            Some(p) if p.status == PaymentStatus::Pending => p,
            _ => return Ok(None),
        };

        let invoice = match self.payments.gateway().invoice_status(&payment.invoice_id).await {
            Ok(invoice) => invoice,
            Err(e) => {
                // Шлюз недоступен - отменяем по времени; поздний колбэк будет залогирован как конфликт
                warn!(booking_id = %booking_id, error = %e, "Gateway check failed, expiring anyway");
                return Ok(None);
            }
        };

        match GatewayOutcome::from_gateway_status(&invoice.status) {
            Ok(GatewayOutcome::Paid) => {
                info!(booking_id = %booking_id, invoice_id = %payment.invoice_id, "Invoice paid during sweep");
                self.payments
                    .apply_gateway_outcome(&payment.invoice_id, GatewayOutcome::Paid)
                    .await?;
                Ok(Some(ExpiryResult::ReconciledPaid))
            }
            // Неоплачен или отклонен - отменяем
            _ => Ok(None),
        }
    }

    /// pending-платежи, чья бронь уже отменена: помечаем failed.
    async fn fail_orphan_payments(&self, cutoff: chrono::DateTime<Utc>) -> AppResult<usize> {
        let orphans = Payment::stale_orphans(&self.db.pool, cutoff, self.config.batch_size).await?;
        let mut cleaned = 0;
        for payment_id in orphans {
            if Payment::mark_failed_if_pending(&self.db.pool, payment_id).await? {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!(count = cleaned, "💳 Orphan payments marked failed");
        }
        Ok(cleaned)
    }
}
