use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use super::{ttl_secs, TtlStore};
use crate::error::{AppError, AppResult};
use crate::redis_client::RedisClient;

/// TTL store поверх Redis, общий для всех инстансов сервиса.
#[derive(Clone)]
pub struct RedisTtlStore {
    redis: RedisClient,
    prefix: String,
}

impl RedisTtlStore {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis,
            prefix: "ticketing".to_string(),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

fn redis_error(e: redis::RedisError) -> AppError {
    AppError::Internal(format!("redis: {}", e))
}

#[async_trait]
impl TtlStore for RedisTtlStore {
    async fn incr_window(&self, key: &str, window: Duration) -> AppResult<u64> {
        let key = self.key(key);
        let mut conn = self.redis.conn.clone();

        // SET NX EX открывает окно, INCR считает. MULTI, чтобы TTL не потерялся.
        let (_, count): (Option<String>, u64) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(0)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(window))
            .cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        Ok(count)
    }

    async fn insert(&self, key: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.redis.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(result.is_some())
    }

    async fn contains(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.redis.conn.clone();
        let exists: bool = conn.exists(self.key(key)).await.map_err(redis_error)?;
        Ok(exists)
    }

    async fn evict(&self, key: &str) -> AppResult<()> {
        let mut conn = self.redis.conn.clone();
        let _: () = conn.del(self.key(key)).await.map_err(redis_error)?;
        Ok(())
    }
}
