//! Клиент платежного шлюза (invoice API).
//!
//! Все сетевые вызовы идут через `CircuitBreaker`: после серии сбоев подряд
//! запросы к шлюзу временно блокируются, чтобы не держать пользователей на таймаутах.
//! Шлюз вызывается только вне транзакций и блокировок.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::error::AppError;

/// Состояния автоматического выключателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальная работа, запросы идут
    Closed,
    /// Слишком много сбоев, запросы блокируются до истечения таймаута
    Open,
    /// Таймаут истек, пробуем снова; первый сбой вернет в Open
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    /// Миллисекунды от `started` до последнего сбоя
    last_failure_ms: AtomicU64,
    started: Instant,
    failure_threshold: u32,
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            started: Instant::now(),
            failure_threshold: failure_threshold.max(1),
            timeout_duration: timeout,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, Duration::from_secs(config.timeout_seconds))
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn can_execute(&self) -> bool {
        let current = self.state();
        match current {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let since_failure = self
                    .now_ms()
                    .saturating_sub(self.last_failure_ms.load(Ordering::Relaxed));
                if since_failure >= self.timeout_duration.as_millis() as u64 {
                    let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                    if *state == CircuitState::Open {
                        *state = CircuitState::HalfOpen;
                        info!("Circuit breaker transitioning to HalfOpen state");
                    }
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        self.failure_count.store(0, Ordering::Relaxed);
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure_ms.store(self.now_ms(), Ordering::Relaxed);

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match *state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                *state = CircuitState::Open;
                error!(
                    failures,
                    threshold = self.failure_threshold,
                    "Circuit breaker OPENED"
                );
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("circuit breaker is open - payment gateway temporarily unavailable")]
    CircuitOpen,
    #[error("payment gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Gateway(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRequest {
    /// Наш id брони, шлюз вернет его в колбэке
    pub external_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub success_redirect_url: String,
    pub failure_redirect_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub invoice_url: Option<String>,
    /// Сырой статус шлюза (PENDING, PAID, SETTLED, EXPIRED, ...)
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError>;

    async fn invoice_status(&self, invoice_id: &str) -> Result<Invoice, GatewayError>;
}

pub struct HttpPaymentGateway {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
    circuit_breaker: CircuitBreaker,
}

impl HttpPaymentGateway {
    pub fn from_config(payment: &PaymentConfig, breaker: &CircuitBreakerConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(payment.request_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: payment.gateway_url.trim_end_matches('/').to_string(),
            api_key: payment.api_key.clone(),
            http_client,
            circuit_breaker: CircuitBreaker::from_config(breaker),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    async fn execute_with_circuit_breaker<F>(&self, operation: F) -> Result<Invoice, GatewayError>
    where
        F: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(GatewayError::CircuitOpen);
        }

        let result = decode_invoice(operation).await;

        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            // 4xx - ошибка запроса, а не недоступность шлюза
            Err(GatewayError::Rejected { status, .. }) if *status < 500 => {
                self.circuit_breaker.record_success()
            }
            Err(e) => {
                error!(error = %e, "Payment gateway request failed");
                self.circuit_breaker.record_failure();
            }
        }
        result
    }
}

async fn decode_invoice<F>(operation: F) -> Result<Invoice, GatewayError>
where
    F: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let response = operation.await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<Invoice>().await?)
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        info!(
            external_id = %request.external_id,
            amount = request.amount,
            currency = %request.currency,
            "Creating invoice"
        );

        let operation = self
            .http_client
            .post(format!("{}/v2/invoices", self.base_url))
            .basic_auth(&self.api_key, Some(""))
            .json(request)
            .send();

        self.execute_with_circuit_breaker(operation).await
    }

    async fn invoice_status(&self, invoice_id: &str) -> Result<Invoice, GatewayError> {
        let operation = self
            .http_client
            .get(format!("{}/v2/invoices/{}", self.base_url, invoice_id))
            .basic_auth(&self.api_key, Some(""))
            .send();

        self.execute_with_circuit_breaker(operation).await
    }
}
