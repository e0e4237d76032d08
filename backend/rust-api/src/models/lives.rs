use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_LIVES: u8 = 3;

/// Lives counter with one timestamp per loss still waiting to be restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivesState {
    pub lives: u8,
    #[serde(default)]
    pub lost_at: Vec<DateTime<Utc>>,
}

impl LivesState {
    pub fn full(max_lives: u8) -> Self {
        Self {
            lives: max_lives,
            lost_at: Vec::new(),
        }
    }

    /// Prunes losses older than `cooldown` and gives their lives back.
    /// Returns how many lives were restored.
    pub fn restore_expired(&mut self, now: DateTime<Utc>, cooldown: Duration, max_lives: u8) -> u8 {
        let before = self.lost_at.len();
        self.lost_at.retain(|lost| now - *lost < cooldown);
        let restored = (before - self.lost_at.len()) as u8;
        if restored > 0 {
            self.lives = self.lives.saturating_add(restored).min(max_lives);
        }
        self.lives = self.lives.min(max_lives);
        restored
    }

    /// Returns `false` without touching the state when no lives are left.
    pub fn lose(&mut self, now: DateTime<Utc>) -> bool {
        if self.lives == 0 {
            return false;
        }
        self.lives -= 1;
        self.lost_at.push(now);
        true
    }

    pub fn time_until_next_restore(
        &self,
        now: DateTime<Utc>,
        cooldown: Duration,
        max_lives: u8,
    ) -> Option<Duration> {
        if self.lives >= max_lives {
            return None;
        }
        let oldest = self.lost_at.iter().min()?;
        let remaining = *oldest + cooldown - now;
        Some(remaining.max(Duration::zero()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LivesResponse {
    pub lives: u8,
    pub max_lives: u8,
    pub next_restore_seconds: Option<i64>,
    pub next_restore_in: Option<String>,
}
