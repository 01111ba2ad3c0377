use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::TtlStore;
use crate::error::AppResult;

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Instant,
}

impl Slot {
    fn fresh(now: Instant, ttl: Duration) -> Self {
        Slot {
            count: 0,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-memory TTL store для одного процесса (и для тестов). Истекшие ключи
/// удаляются лениво при обращении и фоновым `purge_expired`.
#[derive(Debug, Default)]
pub struct MemoryTtlStore {
    slots: DashMap<String, Slot>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn incr_window(&self, key: &str, window: Duration) -> AppResult<u64> {
        let now = Instant::now();
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Slot::fresh(now, window));
        if slot.is_expired(now) {
            *slot = Slot::fresh(now, window);
        }
        slot.count += 1;
        Ok(slot.count)
    }

    async fn insert(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::fresh(now, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::fresh(now, ttl));
                Ok(true)
            }
        }
    }

    async fn contains(&self, key: &str) -> AppResult<bool> {
        let now = Instant::now();
        let live = match self.slots.get(key) {
            Some(slot) => !slot.is_expired(now),
            None => return Ok(false),
        };
        if !live {
            self.slots.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(live)
    }

    async fn evict(&self, key: &str) -> AppResult<()> {
        self.slots.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        Ok(before.saturating_sub(self.slots.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn window_counter_counts_and_resets() {
        let store = MemoryTtlStore::new();
        let window = Duration::from_millis(50);

        assert_eq!(store.incr_window("rate:a", window).await.unwrap(), 1);
        assert_eq!(store.incr_window("rate:a", window).await.unwrap(), 2);
        assert_eq!(store.incr_window("rate:b", window).await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.incr_window("rate:a", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_is_set_if_absent() {
        let store = MemoryTtlStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.insert("seen:inv-1", ttl).await.unwrap());
        assert!(!store.insert("seen:inv-1", ttl).await.unwrap());
        assert!(store.contains("seen:inv-1").await.unwrap());

        store.evict("seen:inv-1").await.unwrap();
        assert!(!store.contains("seen:inv-1").await.unwrap());
        assert!(store.insert("seen:inv-1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn expired_keys_disappear() {
        let store = MemoryTtlStore::new();
        store.insert("k1", Duration::from_millis(10)).await.unwrap();
        store.insert("k2", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!store.contains("k1").await.unwrap());
        assert!(store.insert("k1", Duration::from_millis(10)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn background_purge_drops_untouched_keys() {
        let store = Arc::new(MemoryTtlStore::new());
        store.incr_window("rate:buyer", Duration::from_millis(10)).await.unwrap();
        store.insert("callback:inv-1:Paid", Duration::from_millis(10)).await.unwrap();
        store.insert("callback:inv-2:Paid", Duration::from_secs(60)).await.unwrap();

        let purge = tokio::spawn(crate::cache::run_purge(store.clone(), Duration::from_millis(20)));
        tokio::time::sleep(Duration::from_millis(120)).await;
        purge.abort();

        assert_eq!(store.len(), 1);
        assert!(store.contains("callback:inv-2:Paid").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryTtlStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.incr_window("hot", Duration::from_secs(60)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.incr_window("hot", Duration::from_secs(60)).await.unwrap(), 801);
    }
}
