//! Хранилище ключей с TTL: счетчики окон для rate limit и отметки
//! вида "уже видели". Внедряется в `AppState` как `Arc<dyn TtlStore>`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::AppResult;

pub mod memory_store;
pub mod redis_store;

pub use memory_store::MemoryTtlStore;
pub use redis_store::RedisTtlStore;

#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Увеличивает счетчик окна. Окно начинается с первого инкремента и живет `window`.
    /// Возвращает значение после инкремента.
    async fn incr_window(&self, key: &str, window: Duration) -> AppResult<u64>;

    /// Ставит ключ, только если его нет (или он истек). `true` - ключ поставлен.
    async fn insert(&self, key: &str, ttl: Duration) -> AppResult<bool>;

    async fn contains(&self, key: &str) -> AppResult<bool>;

    async fn evict(&self, key: &str) -> AppResult<()>;

    /// Удаляет истекшие ключи, возвращает их число. Redis делает это сам.
    async fn purge_expired(&self) -> AppResult<usize> {
        Ok(0)
    }
}

/// Фоновая чистка истекших ключей: без нее ключи, к которым больше
/// не обращаются, живут в памяти до рестарта.
pub async fn run_purge(store: Arc<dyn TtlStore>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = every.as_secs(), "TTL store purge started");
    loop {
        interval.tick().await;
        match store.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => debug!(purged, "Purged expired TTL keys"),
            Err(e) => warn!(error = %e, "TTL store purge failed"),
        }
    }
}

/// Redis не принимает EX 0
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}
