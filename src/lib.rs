pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;

use std::sync::Arc;
use tracing::info;

use cache::{MemoryTtlStore, RedisTtlStore, TtlStore};
use error::{AppError, AppResult};
use services::gateway::{HttpPaymentGateway, PaymentGateway};
use services::notifier::{LogNotifier, Notifier, WebhookNotifier};
use services::{BookingService, CatalogService, ExpirySweeper, PaymentService, TicketService};

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub config: config::Config,
    pub db: database::Database,
    pub ttl_store: Arc<dyn TtlStore>,
    pub notifier: Arc<dyn Notifier>,
    pub bookings: BookingService,
    pub payments: Arc<PaymentService>,
    pub catalog: CatalogService,
    pub tickets: TicketService,
    pub sweeper: ExpirySweeper,
}

impl AppState {
    /// Подключается к БД (и Redis, если задан), прогоняет миграции и собирает сервисы.
    pub async fn new(config: config::Config) -> AppResult<Arc<Self>> {
        let db = database::Database::new(&config.database).await?;
        db.run_migrations()
            .await
            .map_err(|e| AppError::Internal(format!("migrations failed: {}", e)))?;
        info!("Database connected");

        let ttl_store: Arc<dyn TtlStore> = match &config.redis.url {
            Some(url) => {
                let redis = redis_client::RedisClient::new(url)
                    .await
                    .map_err(|e| AppError::Internal(format!("redis connection failed: {}", e)))?;
                info!("Redis connected, using shared TTL store");
                Arc::new(RedisTtlStore::new(redis))
            }
            None => {
                info!("REDIS_URL not set, using in-memory TTL store");
                Arc::new(MemoryTtlStore::new())
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
            None => Arc::new(LogNotifier),
        };

        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(HttpPaymentGateway::from_config(&config.payment, &config.circuit_breaker)?);

        Ok(Self::from_parts(config, db, ttl_store, gateway, notifier))
    }

    /// Сборка из готовых зависимостей (тесты подставляют свои шлюз и notifier).
    pub fn from_parts(
        config: config::Config,
        db: database::Database,
        ttl_store: Arc<dyn TtlStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let bookings = BookingService::new(db.clone(), notifier.clone(), config.booking.clone());
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            gateway,
            notifier.clone(),
            config.payment.clone(),
        ));
        let catalog = CatalogService::new(db.clone());
        let tickets = TicketService::new(db.clone());
        let sweeper = ExpirySweeper::new(
            db.clone(),
            payments.clone(),
            notifier.clone(),
            config.sweeper.clone(),
        );

        Arc::new(Self {
            config,
            db,
            ttl_store,
            notifier,
            bookings,
            payments,
            catalog,
            tickets,
            sweeper,
        })
    }
}
