use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::metrics::track_store_operation;
use crate::models::LivesState;

/// Durable key-value home for lives counters.
#[async_trait]
pub trait LivesStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<LivesState>>;
    async fn put(&self, key: &str, state: &LivesState, ttl_seconds: Option<u64>) -> Result<()>;
    async fn has(&self, key: &str) -> Result<bool>;
    async fn ping(&self) -> Result<()>;
}

pub struct RedisLivesStore {
    redis: ConnectionManager,
}

impl RedisLivesStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn redis_key(key: &str) -> String {
        format!("lives:{}", key)
    }
}

#[async_trait]
impl LivesStore for RedisLivesStore {
    async fn get(&self, key: &str) -> Result<Option<LivesState>> {
        let mut conn = self.redis.clone();
        let payload: Option<String> = track_store_operation("redis", "get", async {
            redis::cmd("GET")
                .arg(Self::redis_key(key))
                .query_async(&mut conn)
                .await
                .context("Failed to read lives from Redis")
        })
        .await?;

        match payload {
            Some(json) => match serde_json::from_str(&json) {
                Ok(state) => Ok(Some(state)),
                Err(e) => {
                    tracing::warn!("Discarding corrupt lives record for {}: {}", key, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, state: &LivesState, ttl_seconds: Option<u64>) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(state)?;
        let redis_key = Self::redis_key(key);

        track_store_operation("redis", "set", async {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&redis_key).arg(payload);
            if let Some(ttl) = ttl_seconds {
                cmd.arg("EX").arg(ttl.max(1));
            }
            cmd.query_async::<()>(&mut conn)
                .await
                .context("Failed to save lives to Redis")
        })
        .await
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(Self::redis_key(key))
            .query_async(&mut conn)
            .await
            .context("Failed to check lives key in Redis")?;
        Ok(exists > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_millis(500),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .context("Redis timeout after 500ms")?
        .context("Redis PING failed")?;
        Ok(())
    }
}

/// Process-local store. Expiry hints are ignored: restoration is computed
/// on read, so an entry that outlives its TTL reads the same as a fresh one.
#[derive(Default)]
pub struct InMemoryLivesStore {
    entries: RwLock<HashMap<String, LivesState>>,
}

impl InMemoryLivesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LivesStore for InMemoryLivesStore {
    async fn get(&self, key: &str) -> Result<Option<LivesState>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, state: &LivesState, _ttl_seconds: Option<u64>) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), state.clone());
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.contains_key(key))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
