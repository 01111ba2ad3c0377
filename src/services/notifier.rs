use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Бронь создана, ждем оплату до `payment_deadline`
    BookingCreated,
    BookingPaid,
    BookingCancelled,
    BookingRefunded,
    BookingExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub recipient: Uuid,
    pub kind: NotificationKind,
    pub booking_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_deadline: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(recipient: Uuid, kind: NotificationKind, booking_id: Uuid) -> Self {
        Self {
            recipient,
            kind,
            booking_id,
            payment_deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.payment_deadline = Some(deadline);
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> AppResult<()>;
}

/// Fire-and-forget: вызывается после коммита, ошибки только логируются.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&notification).await {
            warn!(
                booking_id = %notification.booking_id,
                kind = ?notification.kind,
                error = %e,
                "Notification delivery failed"
            );
        }
    });
}

/// Пишет уведомления в лог. Используется, когда webhook не настроен.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        info!(
            recipient = %notification.recipient,
            booking_id = %notification.booking_id,
            kind = ?notification.kind,
            deadline = ?notification.payment_deadline,
            "📨 Notification"
        );
        Ok(())
    }
}

/// Отправляет уведомления POST-запросом на внешний сервис рассылки.
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        self.http_client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AppError::Gateway(format!("notification webhook: {}", e)))?;
        Ok(())
    }
}
