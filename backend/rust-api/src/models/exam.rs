use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::question::{ExamLanguage, Question, QuestionView};

pub const QUESTIONS_PER_EXAM: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Disqualified,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Disqualified => "disqualified",
        }
    }
}

/// Why a session left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    User,
    TimeExpired,
    LivesExhausted,
}

impl SubmitReason {
    pub fn is_automatic(&self) -> bool {
        !matches!(self, SubmitReason::User)
    }

    pub fn terminal_status(&self) -> SessionStatus {
        match self {
            SubmitReason::LivesExhausted => SessionStatus::Disqualified,
            SubmitReason::User | SubmitReason::TimeExpired => SessionStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub language: ExamLanguage,
    pub question_ids: [String; QUESTIONS_PER_EXAM],
    pub status: SessionStatus,
    pub lives_remaining: u8,
    pub total_violations: u32,
    pub auto_submitted: bool,
    pub time_spent_seconds: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        id: String,
        user_id: String,
        language: ExamLanguage,
        question_ids: [String; QUESTIONS_PER_EXAM],
        lives: u8,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            language,
            question_ids,
            status: SessionStatus::InProgress,
            lives_remaining: lives,
            total_violations: 0,
            auto_submitted: false,
            time_spent_seconds: None,
            started_at,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    /// Moves the session into its terminal state. Returns `false` when the
    /// session had already terminated; terminal states are never overwritten.
    pub fn finish(
        &mut self,
        reason: SubmitReason,
        time_spent_seconds: u64,
        at: DateTime<Utc>,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = reason.terminal_status();
        self.auto_submitted = reason.is_automatic();
        self.time_spent_seconds = Some(time_spent_seconds);
        self.completed_at = Some(at);
        true
    }

    pub fn patch(&self) -> SessionPatch {
        SessionPatch {
            status: Some(self.status),
            lives_remaining: Some(self.lives_remaining),
            total_violations: Some(self.total_violations),
            auto_submitted: Some(self.auto_submitted),
            time_spent_seconds: self.time_spent_seconds,
            completed_at: self.completed_at,
        }
    }
}

/// Partial update mirrored to the exam store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lives_remaining: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_violations: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_submitted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_spent_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(lives) = self.lives_remaining {
            session.lives_remaining = lives;
        }
        if let Some(total) = self.total_violations {
            session.total_violations = total;
        }
        if let Some(auto) = self.auto_submitted {
            session.auto_submitted = auto;
        }
        if self.time_spent_seconds.is_some() {
            session.time_spent_seconds = self.time_spent_seconds;
        }
        if self.completed_at.is_some() {
            session.completed_at = self.completed_at;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Unanswered,
    Attempted,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_index: usize,
    pub question_id: String,
    pub code: String,
    pub status: AnswerStatus,
    pub tests_passed: u32,
    pub tests_total: u32,
    pub compilation_errors: u32,
    pub runtime_errors: u32,
    pub run_count: u32,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Answer {
    pub fn placeholder(question_index: usize, question: &Question) -> Self {
        Self {
            question_index,
            question_id: question.id.clone(),
            code: question.starter_code.clone(),
            status: AnswerStatus::Unanswered,
            tests_passed: 0,
            tests_total: 0,
            compilation_errors: 0,
            runtime_errors: 0,
            run_count: 0,
            last_run_at: None,
        }
    }

    /// Last write wins; the first non-blank edit marks the question attempted.
    pub fn edit(&mut self, code: String) {
        if self.status == AnswerStatus::Unanswered && !code.trim().is_empty() {
            self.status = AnswerStatus::Attempted;
        }
        self.code = code;
    }

    /// The status always reflects the latest run, so a failing re-run moves
    /// a completed answer back to attempted.
    pub fn apply_run(&mut self, result: &RunResult, at: DateTime<Utc>) {
        self.tests_passed = result.tests_passed;
        self.tests_total = result.tests_total;
        self.compilation_errors = result.compilation_errors;
        self.runtime_errors = result.runtime_errors;
        self.run_count += 1;
        self.last_run_at = Some(at);
        self.status = if result.all_passed() {
            AnswerStatus::Completed
        } else {
            AnswerStatus::Attempted
        };
    }

    pub fn patch(&self) -> AnswerPatch {
        AnswerPatch {
            code: Some(self.code.clone()),
            status: Some(self.status),
            tests_passed: Some(self.tests_passed),
            tests_total: Some(self.tests_total),
            compilation_errors: Some(self.compilation_errors),
            runtime_errors: Some(self.runtime_errors),
            run_count: Some(self.run_count),
            last_run_at: self.last_run_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AnswerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_passed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests_total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compilation_errors: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_errors: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Grading outcome reported by the surrounding editor after running the judge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub tests_passed: u32,
    pub tests_total: u32,
    #[serde(default)]
    pub compilation_errors: u32,
    #[serde(default)]
    pub runtime_errors: u32,
    #[serde(default)]
    pub grader_error: Option<String>,
}

impl RunResult {
    pub fn is_consistent(&self) -> bool {
        self.tests_passed <= self.tests_total
    }

    pub fn all_passed(&self) -> bool {
        self.grader_error.is_none()
            && self.tests_total > 0
            && self.tests_passed == self.tests_total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    FullscreenExit,
    TabSwitch,
    WindowBlur,
    Copy,
    Paste,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::FullscreenExit => "fullscreen_exit",
            ViolationType::TabSwitch => "tab_switch",
            ViolationType::WindowBlur => "window_blur",
            ViolationType::Copy => "copy",
            ViolationType::Paste => "paste",
        }
    }

    /// Clipboard violations are penalized on the spot, without a grace period.
    pub fn is_instantaneous(&self) -> bool {
        matches!(self, ViolationType::Copy | ViolationType::Paste)
    }
}

/// Immutable audit record, one per applied penalty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub violation_type: ViolationType,
    pub hearts_before: u8,
    pub hearts_after: u8,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartExamRequest {
    pub language: ExamLanguage,
    #[validate(length(min = 1, max = 64))]
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAnswerRequest {
    #[validate(length(max = 100000))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct StartExamResponse {
    pub session_id: String,
    pub language: ExamLanguage,
    pub language_name: &'static str,
    pub questions: Vec<QuestionView>,
    pub lives_remaining: u8,
    pub total_seconds: u64,
    pub seconds_until_submit: u64,
    pub directives: Vec<super::signal::Directive>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerStatus {
    pub total_seconds: u64,
    pub elapsed_seconds: u64,
    pub remaining_seconds: u64,
    pub can_submit: bool,
    pub seconds_until_submit: u64,
    pub time_critical: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamSnapshot {
    pub session: Session,
    pub answers: Vec<Answer>,
    pub violations: Vec<Violation>,
    pub timer: Option<TimerStatus>,
    pub pending_violation: Option<ViolationType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_index: usize,
    pub weight: f64,
    pub tests_passed: u32,
    pub tests_total: u32,
    pub points: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamScore {
    pub session_id: String,
    pub questions: Vec<QuestionScore>,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamStats {
    pub total: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub disqualified: usize,
}

#[derive(Debug, Serialize)]
pub struct AdminSessionList {
    pub stats: ExamStats,
    pub sessions: Vec<Session>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::Difficulty;

    fn question() -> Question {
        Question {
            id: "q-1".to_string(),
            language: ExamLanguage::Python,
            title: "Title".to_string(),
            description: "Description".to_string(),
            difficulty: Difficulty::Easy,
            topic: None,
            starter_code: "def solve():\n    pass\n".to_string(),
            input_format: None,
            output_format: None,
            constraints: None,
            visible_test_cases: vec![],
            hidden_test_cases: vec![],
            time_limit_ms: 2000,
            memory_limit_mb: 256,
        }
    }

    fn session() -> Session {
        Session::new(
            "s-1".to_string(),
            "u-1".to_string(),
            ExamLanguage::Python,
            ["a".to_string(), "b".to_string(), "c".to_string()],
            3,
            Utc::now(),
        )
    }

    #[test]
    fn finish_is_sticky() {
        let mut session = session();
        assert!(session.finish(SubmitReason::LivesExhausted, 120, Utc::now()));
        assert_eq!(session.status, SessionStatus::Disqualified);
        assert!(session.auto_submitted);

        assert!(!session.finish(SubmitReason::User, 999, Utc::now()));
        assert_eq!(session.status, SessionStatus::Disqualified);
        assert_eq!(session.time_spent_seconds, Some(120));
    }

    #[test]
    fn time_expiry_completes_without_disqualifying() {
        let mut session = session();
        session.finish(SubmitReason::TimeExpired, 10800, Utc::now());
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.auto_submitted);
    }

    #[test]
    fn placeholder_starts_with_starter_code() {
        let answer = Answer::placeholder(0, &question());
        assert_eq!(answer.status, AnswerStatus::Unanswered);
        assert!(answer.code.starts_with("def solve"));
    }

    #[test]
    fn blank_edit_keeps_unanswered() {
        let mut answer = Answer::placeholder(0, &question());
        answer.edit("   \n".to_string());
        assert_eq!(answer.status, AnswerStatus::Unanswered);
        answer.edit("print(1)".to_string());
        assert_eq!(answer.status, AnswerStatus::Attempted);
    }

    #[test]
    fn run_status_tracks_latest_result() {
        let mut answer = Answer::placeholder(1, &question());
        let pass = RunResult {
            tests_passed: 8,
            tests_total: 8,
            ..Default::default()
        };
        answer.apply_run(&pass, Utc::now());
        assert_eq!(answer.status, AnswerStatus::Completed);

        let fail = RunResult {
            tests_passed: 5,
            tests_total: 8,
            ..Default::default()
        };
        answer.apply_run(&fail, Utc::now());
        assert_eq!(answer.status, AnswerStatus::Attempted);
        assert_eq!(answer.run_count, 2);
    }

    #[test]
    fn zero_tests_or_grader_error_is_never_completed() {
        let empty = RunResult::default();
        assert!(!empty.all_passed());

        let errored = RunResult {
            tests_passed: 3,
            tests_total: 3,
            grader_error: Some("judge timeout".to_string()),
            ..Default::default()
        };
        assert!(!errored.all_passed());
    }

    #[test]
    fn session_patch_skips_absent_fields() {
        let patch = SessionPatch {
            lives_remaining: Some(2),
            total_violations: Some(1),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({ "lives_remaining": 2, "total_violations": 1 }));

        let mut session = session();
        patch.apply_to(&mut session);
        assert_eq!(session.lives_remaining, 2);
        assert_eq!(session.status, SessionStatus::InProgress);
    }
}
