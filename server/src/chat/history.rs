//! REST endpoint for recent chat history.

use axum::{extract::State, Json};

use crate::auth::gate::ApiKeyGate;
use crate::db::models::ChatMessageRecord;
use crate::db::store::with_deadline;
use crate::error::ChatError;
use crate::state::AppState;

/// Page size for message history.
pub const HISTORY_LIMIT: usize = 20;

/// GET /getMessages
/// Up to `HISTORY_LIMIT` most recent records, newest first. API key required.
pub async fn latest_messages(
    State(state): State<AppState>,
    _gate: ApiKeyGate,
) -> Result<Json<Vec<ChatMessageRecord>>, ChatError> {
    let records = with_deadline(
        state.settings.persistence_timeout,
        "latest_messages",
        state.store.latest_messages(HISTORY_LIMIT),
    )
    .await?;

    Ok(Json(records))
}
