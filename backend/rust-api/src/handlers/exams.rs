use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use validator::Validate;

use crate::error::ExamError;
use crate::extractors::{AppJson, AuthUser};
use crate::models::exam::{ExamScore, StartExamRequest, StartExamResponse, UpdateAnswerRequest};
use crate::models::{Answer, EnvSignal, ExamSnapshot, QuestionView, RunResult, SignalOutcome};
use crate::services::AppState;
use crate::utils::time::format_exam_time;

#[derive(Debug, Serialize)]
pub struct ExamDetailResponse {
    #[serde(flatten)]
    pub snapshot: ExamSnapshot,
    pub questions: Vec<QuestionView>,
    pub remaining_display: Option<String>,
}

/// POST /api/v1/exams
pub async fn start_exam(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    AppJson(payload): AppJson<StartExamRequest>,
) -> Result<(StatusCode, Json<StartExamResponse>), ExamError> {
    payload.validate()?;

    let response = state.exams.start(&claims.sub, payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/exams/{id}
pub async fn get_exam(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<ExamDetailResponse>, ExamError> {
    let snapshot = state.exams.snapshot(&session_id, &claims.sub).await?;
    let questions = state.exams.questions(&snapshot).await?;
    let remaining_display = snapshot
        .timer
        .as_ref()
        .map(|timer| format_exam_time(timer.remaining_seconds));

    Ok(Json(ExamDetailResponse {
        snapshot,
        questions,
        remaining_display,
    }))
}

/// PUT /api/v1/exams/{id}/answers/{index}
pub async fn update_answer(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path((session_id, index)): Path<(String, usize)>,
    AppJson(payload): AppJson<UpdateAnswerRequest>,
) -> Result<Json<Answer>, ExamError> {
    payload.validate()?;

    let answer = state
        .exams
        .update_answer(&session_id, &claims.sub, index, payload.code)
        .await?;
    Ok(Json(answer))
}

/// POST /api/v1/exams/{id}/answers/{index}/runs
pub async fn record_run(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path((session_id, index)): Path<(String, usize)>,
    AppJson(result): AppJson<RunResult>,
) -> Result<Json<Answer>, ExamError> {
    let answer = state
        .exams
        .record_run(&session_id, &claims.sub, index, result)
        .await?;
    Ok(Json(answer))
}

/// POST /api/v1/exams/{id}/signals
pub async fn post_signal(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(session_id): Path<String>,
    AppJson(signal): AppJson<EnvSignal>,
) -> Result<Json<SignalOutcome>, ExamError> {
    let outcome = state.exams.signal(&session_id, &claims.sub, signal).await?;
    Ok(Json(outcome))
}

/// POST /api/v1/exams/{id}/submit
pub async fn submit_exam(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<ExamSnapshot>, ExamError> {
    let snapshot = state.exams.submit(&session_id, &claims.sub).await?;
    Ok(Json(snapshot))
}

/// GET /api/v1/exams/{id}/score
pub async fn get_score(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<ExamScore>, ExamError> {
    let score = state.exams.score(&session_id, &claims.sub).await?;
    Ok(Json(score))
}
