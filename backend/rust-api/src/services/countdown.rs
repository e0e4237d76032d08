//! Countdown for a bounded exam session.
//!
//! The timer is a plain value advanced one second per `tick()`. The session
//! runtime owns the interval that drives it, so stopping the timer and
//! observing the final tick happen on the same task and can never interleave.

use crate::models::exam::TimerStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub remaining_seconds: u64,
    pub elapsed_seconds: u64,
    pub total_seconds: u64,
    pub can_submit: bool,
    /// True on exactly one tick: the one that reaches zero.
    pub expired: bool,
}

#[derive(Debug, Clone)]
pub struct CountdownTimer {
    phase: Phase,
    total_seconds: u64,
    elapsed_seconds: u64,
    submit_unlock_seconds: u64,
    time_critical_seconds: u64,
}

impl CountdownTimer {
    pub fn new(submit_unlock_seconds: u64, time_critical_seconds: u64) -> Self {
        Self {
            phase: Phase::Idle,
            total_seconds: 0,
            elapsed_seconds: 0,
            submit_unlock_seconds,
            time_critical_seconds,
        }
    }

    /// Starts counting down. A timer only runs once: calling `start` while
    /// running, or after it stopped or expired, is a no-op returning `false`.
    pub fn start(&mut self, total_seconds: u64) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.total_seconds = total_seconds;
        self.elapsed_seconds = 0;
        self.phase = Phase::Running;
        true
    }

    pub fn tick(&mut self) -> Option<Tick> {
        if self.phase != Phase::Running {
            return None;
        }
        self.elapsed_seconds = (self.elapsed_seconds + 1).min(self.total_seconds);
        let remaining_seconds = self.remaining_seconds();
        let expired = remaining_seconds == 0;
        if expired {
            self.phase = Phase::Expired;
        }
        Some(Tick {
            remaining_seconds,
            elapsed_seconds: self.elapsed_seconds,
            total_seconds: self.total_seconds,
            can_submit: self.can_submit(),
            expired,
        })
    }

    /// Safe from any phase and repeatable. An expired timer stays expired.
    pub fn stop(&mut self) {
        if matches!(self.phase, Phase::Idle | Phase::Running) {
            self.phase = Phase::Stopped;
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_expired(&self) -> bool {
        self.phase == Phase::Expired
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.total_seconds.saturating_sub(self.elapsed_seconds)
    }

    pub fn can_submit(&self) -> bool {
        self.elapsed_seconds >= self.submit_unlock_seconds
    }

    pub fn seconds_until_submit(&self) -> u64 {
        self.submit_unlock_seconds
            .saturating_sub(self.elapsed_seconds)
    }

    pub fn is_time_critical(&self) -> bool {
        self.phase == Phase::Running && self.remaining_seconds() < self.time_critical_seconds
    }

    pub fn status(&self) -> TimerStatus {
        TimerStatus {
            total_seconds: self.total_seconds,
            elapsed_seconds: self.elapsed_seconds,
            remaining_seconds: self.remaining_seconds(),
            can_submit: self.can_submit(),
            seconds_until_submit: self.seconds_until_submit(),
            time_critical: self.is_time_critical(),
        }
    }
}
