use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::metrics::LIVES_LOST_TOTAL;
use crate::models::LivesState;
use crate::services::lives_store::LivesStore;
use crate::utils::clock::Clock;

const ANONYMOUS_BUCKET: &str = "anonymous";

/// Identifies whose lives are being read or spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivesBucket {
    User(String),
    Anonymous,
    Session(String),
}

impl LivesBucket {
    pub fn for_user(user_id: Option<&str>) -> Self {
        match user_id {
            Some(id) if !id.is_empty() => LivesBucket::User(id.to_string()),
            _ => LivesBucket::Anonymous,
        }
    }

    pub fn key(&self) -> String {
        match self {
            LivesBucket::User(id) => format!("user:{}", id),
            LivesBucket::Anonymous => ANONYMOUS_BUCKET.to_string(),
            LivesBucket::Session(id) => format!("exam:{}", id),
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            LivesBucket::Session(_) => "exam",
            LivesBucket::User(_) | LivesBucket::Anonymous => "practice",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePolicy {
    /// Each lost life comes back once this much time has passed.
    Cooldown(Duration),
    Never,
}

/// Lives counter with lazy, read-time restoration.
///
/// Every public call is an atomic read-modify-write against the store; the
/// ledger serializes its own calls, which is all the isolation a single
/// user's browser needs.
pub struct LivesLedger {
    store: Arc<dyn LivesStore>,
    clock: Arc<dyn Clock>,
    max_lives: u8,
    policy: RestorePolicy,
    guard: Mutex<()>,
}

impl LivesLedger {
    pub fn new(
        store: Arc<dyn LivesStore>,
        clock: Arc<dyn Clock>,
        max_lives: u8,
        policy: RestorePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            max_lives,
            policy,
            guard: Mutex::new(()),
        }
    }

    pub fn max_lives(&self) -> u8 {
        self.max_lives
    }

    pub async fn current(&self, bucket: &LivesBucket) -> Result<LivesState> {
        let _guard = self.guard.lock().await;
        self.load_restored(bucket).await
    }

    pub async fn current_lives(&self, bucket: &LivesBucket) -> Result<u8> {
        Ok(self.current(bucket).await?.lives)
    }

    pub async fn has_lives(&self, bucket: &LivesBucket) -> Result<bool> {
        Ok(self.current_lives(bucket).await? > 0)
    }

    /// Spends one life. With none left the state is returned unchanged.
    pub async fn lose_life(&self, bucket: &LivesBucket) -> Result<LivesState> {
        let _guard = self.guard.lock().await;
        let mut state = self.load_restored(bucket).await?;

        if !state.lose(self.clock.now()) {
            tracing::debug!("No lives left to lose for {}", bucket.key());
            return Ok(state);
        }

        self.save(bucket, &state).await?;
        LIVES_LOST_TOTAL.with_label_values(&[bucket.scope()]).inc();
        tracing::info!(
            "Life lost: bucket={}, lives={}/{}",
            bucket.key(),
            state.lives,
            self.max_lives
        );
        Ok(state)
    }

    pub async fn time_until_next_restore(&self, bucket: &LivesBucket) -> Result<Option<Duration>> {
        let RestorePolicy::Cooldown(cooldown) = self.policy else {
            return Ok(None);
        };
        let state = self.current(bucket).await?;
        Ok(state.time_until_next_restore(self.clock.now(), cooldown, self.max_lives))
    }

    /// Administrative reset back to full lives. A bucket with no stored
    /// record already reads as full and is left alone.
    pub async fn reset(&self, bucket: &LivesBucket) -> Result<LivesState> {
        let _guard = self.guard.lock().await;
        let state = LivesState::full(self.max_lives);
        if !self.store.has(&bucket.key()).await? {
            tracing::debug!("Lives reset skipped, no record for {}", bucket.key());
            return Ok(state);
        }
        self.save(bucket, &state).await?;
        tracing::info!("Lives reset: bucket={}", bucket.key());
        Ok(state)
    }

    async fn load_restored(&self, bucket: &LivesBucket) -> Result<LivesState> {
        let key = bucket.key();
        let Some(mut state) = self.store.get(&key).await? else {
            return Ok(LivesState::full(self.max_lives));
        };

        if let RestorePolicy::Cooldown(cooldown) = self.policy {
            let restored = state.restore_expired(self.clock.now(), cooldown, self.max_lives);
            if restored > 0 {
                tracing::debug!("Restored {} lives for {}", restored, key);
                self.save(bucket, &state).await?;
            }
        }
        state.lives = state.lives.min(self.max_lives);
        Ok(state)
    }

    async fn save(&self, bucket: &LivesBucket, state: &LivesState) -> Result<()> {
        // Once every pending loss has cooled down the record reads as full lives,
        // so it can expire from the store.
        let ttl = match self.policy {
            RestorePolicy::Cooldown(cooldown) if !state.lost_at.is_empty() => {
                Some(cooldown.num_seconds().max(1) as u64)
            }
            _ => None,
        };
        self.store.put(&bucket.key(), state, ttl).await
    }
}
