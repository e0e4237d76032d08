use axum::{extract::State, Json};
use std::sync::Arc;

use crate::error::ExamError;
use crate::extractors::OptionalUser;
use crate::models::lives::LivesResponse;
use crate::services::lives_service::{LivesBucket, LivesLedger};
use crate::services::AppState;
use crate::utils::time::format_time_remaining;

fn bucket_for(user: &OptionalUser) -> LivesBucket {
    LivesBucket::for_user(user.0.as_ref().map(|claims| claims.sub.as_str()))
}

pub(crate) async fn lives_response(
    ledger: &LivesLedger,
    bucket: &LivesBucket,
) -> Result<LivesResponse, ExamError> {
    let state = ledger.current(bucket).await?;
    let next_restore = ledger.time_until_next_restore(bucket).await?;

    Ok(LivesResponse {
        lives: state.lives,
        max_lives: ledger.max_lives(),
        next_restore_seconds: next_restore.map(|d| d.num_seconds()),
        next_restore_in: next_restore.map(format_time_remaining),
    })
}

/// GET /api/v1/lives
pub async fn get_lives(
    State(state): State<Arc<AppState>>,
    user: OptionalUser,
) -> Result<Json<LivesResponse>, ExamError> {
    let bucket = bucket_for(&user);
    Ok(Json(lives_response(&state.lives, &bucket).await?))
}

/// POST /api/v1/lives/lose
pub async fn lose_life(
    State(state): State<Arc<AppState>>,
    user: OptionalUser,
) -> Result<Json<LivesResponse>, ExamError> {
    let bucket = bucket_for(&user);
    state.lives.lose_life(&bucket).await?;
    Ok(Json(lives_response(&state.lives, &bucket).await?))
}
