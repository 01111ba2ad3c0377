#![allow(dead_code)]

use async_trait::async_trait;
use fake::faker::name::en::Name;
use fake::Fake;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use ticket_inventory::cache::MemoryTtlStore;
use ticket_inventory::config::Config;
use ticket_inventory::database::Database;
use ticket_inventory::error::AppResult;
use ticket_inventory::models::{NewTicketType, NewVisitor, VisitorTitle};
use ticket_inventory::services::booking::CreateBookingRequest;
use ticket_inventory::services::gateway::{GatewayError, Invoice, InvoiceRequest, PaymentGateway};
use ticket_inventory::services::notifier::{Notification, NotificationKind, Notifier};
use ticket_inventory::AppState;

pub const CALLBACK_TOKEN: &str = "test-callback-token";

pub struct TestApp {
    pub state: Arc<AppState>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<StubGateway>,
}

impl TestApp {
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.state.db.pool
    }
}

/// Конфиг для тестов поверх дефолтов. `None`, если DATABASE_URL не задан.
pub fn test_config() -> Option<Config> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let mut config = Config::default();
    config.database.url = url;
    config.database.pool_size = 30;
    config.payment.callback_token = CALLBACK_TOKEN.to_string();
    config.sweeper.enabled = false;
    Some(config)
}

pub async fn setup() -> Option<TestApp> {
    setup_with(|_| {}).await
}

pub async fn setup_with(configure: impl FnOnce(&mut Config)) -> Option<TestApp> {
    let Some(mut config) = test_config() else {
        eprintln!("DATABASE_URL is not set, skipping database test");
        return None;
    };
    configure(&mut config);

    let db = Database::new(&config.database).await.expect("database connection");
    db.run_migrations().await.expect("migrations");

    let notifier = Arc::new(RecordingNotifier::default());
    let gateway = Arc::new(StubGateway::default());
    let state = AppState::from_parts(
        config,
        db,
        Arc::new(MemoryTtlStore::new()),
        gateway.clone(),
        notifier.clone(),
    );

    Some(TestApp {
        state,
        notifier,
        gateway,
    })
}

/// Событие с одним типом билета. Возвращает id типа.
pub async fn seed_ticket_type(app: &TestApp, quota: i32, price: i64) -> i64 {
    let event_id: i64 = sqlx::query_scalar(
        "INSERT INTO events (name, capacity) VALUES ($1, $2) RETURNING id",
    )
    .bind(format!("Event {}", Uuid::new_v4()))
    .bind(quota.max(1) * 2)
    .fetch_one(app.pool())
    .await
    .expect("seed event");

    app.state
        .catalog
        .create_ticket_type(NewTicketType {
            event_id,
            name: "General admission".to_string(),
            price,
            quota,
        })
        .await
        .expect("seed ticket type")
        .id
}

pub async fn quota_of(app: &TestApp, ticket_type_id: i64) -> i32 {
    sqlx::query_scalar("SELECT quota FROM ticket_types WHERE id = $1")
        .bind(ticket_type_id)
        .fetch_one(app.pool())
        .await
        .expect("quota")
}

pub fn visitor() -> NewVisitor {
    NewVisitor {
        title: VisitorTitle::Ms,
        full_name: Name().fake(),
        phone_number: format!("+62{}", (100_000_000..999_999_999u64).fake::<u64>()),
        nationality: "Indonesia".to_string(),
        national_id: format!("ID-{}", Uuid::new_v4()),
    }
}

pub fn booking_request(ticket_type_id: i64, quantity: u32) -> CreateBookingRequest {
    CreateBookingRequest {
        ticket_type_id,
        quantity,
        visitors: (0..quantity).map(|_| visitor()).collect(),
    }
}

/// Сдвигает бронь и ее платеж в прошлое.
pub async fn backdate_booking(app: &TestApp, booking_id: Uuid, by: Duration) {
    let secs = by.as_secs() as f64;
    sqlx::query("UPDATE bookings SET created_at = NOW() - make_interval(secs => $2) WHERE id = $1")
        .bind(booking_id)
        .bind(secs)
        .execute(app.pool())
        .await
        .expect("backdate booking");
    sqlx::query("UPDATE payments SET created_at = NOW() - make_interval(secs => $2) WHERE booking_id = $1")
        .bind(booking_id)
        .bind(secs)
        .execute(app.pool())
        .await
        .expect("backdate payment");
}

/// Сдвигает в прошлое только бронь, платеж остается свежим.
pub async fn backdate_booking_only(app: &TestApp, booking_id: Uuid, by: Duration) {
    sqlx::query("UPDATE bookings SET created_at = NOW() - make_interval(secs => $2) WHERE id = $1")
        .bind(booking_id)
        .bind(by.as_secs() as f64)
        .execute(app.pool())
        .await
        .expect("backdate booking");
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn kinds_for(&self, booking_id: Uuid) -> Vec<NotificationKind> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.booking_id == booking_id)
            .map(|n| n.kind)
            .collect()
    }

    /// dispatch отправляет в фоне, поэтому ждем.
    pub async fn wait_for(&self, booking_id: Uuid, kind: NotificationKind) -> bool {
        for _ in 0..50 {
            if self.kinds_for(booking_id).contains(&kind) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Шлюз в памяти: счета создаются в PENDING, статус меняет тест.
#[derive(Default)]
pub struct StubGateway {
    invoices: Mutex<HashMap<String, String>>,
    pub created: AtomicUsize,
    pub unavailable: AtomicBool,
}

impl StubGateway {
    pub fn set_status(&self, invoice_id: &str, status: &str) {
        self.invoices
            .lock()
            .unwrap()
            .insert(invoice_id.to_string(), status.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_invoice(&self, _request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::CircuitOpen);
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("inv-{}", Uuid::new_v4());
        self.set_status(&id, "PENDING");
        Ok(Invoice {
            invoice_url: Some(format!("https://pay.test/{}", id)),
            id,
            status: "PENDING".to_string(),
        })
    }

    async fn invoice_status(&self, invoice_id: &str) -> Result<Invoice, GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::CircuitOpen);
        }
        let status = self
            .invoices
            .lock()
            .unwrap()
            .get(invoice_id)
            .cloned()
            .ok_or(GatewayError::Rejected {
                status: 404,
                body: "invoice not found".to_string(),
            })?;
        Ok(Invoice {
            id: invoice_id.to_string(),
            invoice_url: None,
            status,
        })
    }
}
