use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ExamError;
use crate::middlewares::auth::JwtClaims;
use crate::services::eligibility_service::EligibilityRecord;
use crate::services::AppState;

/// GET /admin/eligibility/blocked
pub async fn list_blocked(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<EligibilityRecord>>, ExamError> {
    let blocked = state.eligibility.list_blocked().await?;
    Ok(Json(blocked))
}

/// POST /admin/eligibility/{user_id}/approve
pub async fn approve_retake(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ExamError> {
    let approved = state.eligibility.approve_retake(&user_id, &claims.sub).await?;

    if approved {
        tracing::info!("Retake approved: user={}, by={}", user_id, claims.sub);
    } else {
        tracing::debug!("Retake approval ignored, user {} is not blocked", user_id);
    }

    Ok(Json(json!({
        "user_id": user_id,
        "approved": approved,
        "approved_by": claims.sub,
    })))
}
