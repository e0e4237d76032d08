use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::ExamLanguage;

#[derive(Debug, thiserror::Error)]
pub enum ExamError {
    #[error("You are not eligible to start a new exam. Please contact an administrator to approve a retake.")]
    Ineligible,

    #[error("Not enough questions available for {language} (topic: {topic}). Need 3, have {available}")]
    SelectionExhausted {
        language: ExamLanguage,
        topic: String,
        available: usize,
    },

    #[error("Fullscreen was denied by the browser")]
    FullscreenDenied,

    #[error("Exam session not found")]
    SessionNotFound,

    #[error("Exam session is no longer active")]
    NotActive,

    #[error("Question index {0} is out of range")]
    InvalidQuestionIndex(usize),

    #[error("Run result reports {passed} passed out of {total} tests")]
    InvalidRunResult { passed: u32, total: u32 },

    #[error("Submission unlocks in {seconds_remaining} seconds")]
    SubmitLocked { seconds_remaining: u64 },

    #[error("An exam is already in progress: {session_id}")]
    AlreadyInProgress { session_id: String },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Access to this exam session is forbidden")]
    Forbidden,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ExamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExamError::Ineligible | ExamError::Forbidden => StatusCode::FORBIDDEN,
            ExamError::SelectionExhausted { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ExamError::FullscreenDenied => StatusCode::PRECONDITION_FAILED,
            ExamError::SessionNotFound => StatusCode::NOT_FOUND,
            ExamError::NotActive | ExamError::AlreadyInProgress { .. } => StatusCode::CONFLICT,
            ExamError::InvalidQuestionIndex(_)
            | ExamError::InvalidRunResult { .. }
            | ExamError::Validation(_) => StatusCode::BAD_REQUEST,
            ExamError::SubmitLocked { .. } => StatusCode::TOO_EARLY,
            ExamError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ExamError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ExamError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Exam request failed: {:#}", self);
        }
        let body = json!({
            "message": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ExamError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ExamError::Validation(errors.to_string())
    }
}
