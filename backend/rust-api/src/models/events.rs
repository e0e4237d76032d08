use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::exam::{SessionStatus, ViolationType};
use super::signal::Directive;

/// Everything a session publishes to its stream subscribers.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExamEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
    Directive(DirectiveIssued),
    LifeLost(LifeLost),
    SessionFinished(SessionFinished),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub session_id: String,
    pub remaining_seconds: u64,
    pub elapsed_seconds: u64,
    pub total_seconds: u64,
    pub can_submit: bool,
    pub seconds_until_submit: u64,
    pub time_critical: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeExpired {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DirectiveIssued {
    pub session_id: String,
    pub directive: Directive,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LifeLost {
    pub session_id: String,
    pub violation_type: ViolationType,
    pub hearts_before: u8,
    pub hearts_after: u8,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionFinished {
    pub session_id: String,
    pub status: SessionStatus,
    pub auto_submitted: bool,
    pub time_spent_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

impl ExamEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ExamEvent::TimerTick(_) => "timer-tick",
            ExamEvent::TimeExpired(_) => "time-expired",
            ExamEvent::Directive(_) => "directive",
            ExamEvent::LifeLost(_) => "life-lost",
            ExamEvent::SessionFinished(_) => "session-finished",
        }
    }
}
