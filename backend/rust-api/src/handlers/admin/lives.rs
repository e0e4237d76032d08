use axum::{
    extract::{Extension, Path, State},
    Json,
};
use std::sync::Arc;

use crate::error::ExamError;
use crate::handlers::lives::lives_response;
use crate::middlewares::auth::JwtClaims;
use crate::models::lives::LivesResponse;
use crate::services::lives_service::LivesBucket;
use crate::services::AppState;

/// POST /admin/lives/{user_id}/reset
pub async fn reset_lives(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(user_id): Path<String>,
) -> Result<Json<LivesResponse>, ExamError> {
    let bucket = LivesBucket::for_user(Some(&user_id));
    state.lives.reset(&bucket).await?;
    tracing::info!("Practice lives reset: user={}, by={}", user_id, claims.sub);

    Ok(Json(lives_response(&state.lives, &bucket).await?))
}
