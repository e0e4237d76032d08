pub mod events;
pub mod exam;
pub mod lives;
pub mod question;
pub mod signal;

pub use exam::{
    Answer, AnswerStatus, ExamSnapshot, RunResult, Session, SessionStatus, SubmitReason,
    Violation, ViolationType, QUESTIONS_PER_EXAM,
};
pub use lives::LivesState;
pub use question::{Difficulty, ExamLanguage, Question, QuestionView};
pub use signal::{Directive, EnvSignal, SignalOutcome};
