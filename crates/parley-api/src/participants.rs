use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use crate::state::AppState;

/// Admin listing: every user with all participant relationships and transcripts.
pub async fn list_participants(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    // Run blocking DB query off the async runtime
    let db = state.db.clone();
    let records = tokio::task::spawn_blocking(move || db.list_user_records())
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("Failed to list participants: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    Ok(Json(records))
}
