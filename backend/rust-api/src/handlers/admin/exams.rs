use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ExamError;
use crate::models::exam::AdminSessionList;
use crate::services::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListExamsQuery {
    pub limit: Option<i64>,
}

/// GET /admin/exams
pub async fn list_exams(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListExamsQuery>,
) -> Result<Json<AdminSessionList>, ExamError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let list = state.exams.list_sessions(limit).await?;
    Ok(Json(list))
}
