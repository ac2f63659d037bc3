//! Identity issuance and token check endpoints.

use axum::{body::Bytes, extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::gate::{ApiKeyGate, AuthTokenGate};
use crate::auth::jwt;
use crate::db::store::with_deadline;
use crate::error::ChatError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IssueIdentityRequest {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueIdentityResponse {
    pub username: String,
    pub jwt: String,
    pub expiration_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct TokenCheckRequest {
    pub jwt: String,
}

/// POST /auth
/// Lookup-or-create a session token for a username. Requires the privileged
/// `Authorization` secret. The record is persisted before the response is sent.
pub async fn issue_identity(
    State(state): State<AppState>,
    _gate: AuthTokenGate,
    body: Bytes,
) -> Result<Json<IssueIdentityResponse>, ChatError> {
    let request: IssueIdentityRequest = serde_json::from_slice(&body)
        .map_err(|_| ChatError::MalformedInput("Not a viable payload".to_string()))?;

    let username = request.username.trim();
    if username.is_empty() {
        return Err(ChatError::MalformedInput("Not a viable payload".to_string()));
    }

    let candidate = jwt::mint_session_token(&state.jwt_secret, username, state.settings.token_ttl)?;
    let issued = with_deadline(
        state.settings.persistence_timeout,
        "issue_identity",
        state.store.issue_identity(candidate),
    )
    .await?;

    if issued.created {
        tracing::info!(username = %username, "Issued new session token");
    } else {
        tracing::debug!(username = %username, "Returned existing session token");
    }

    Ok(Json(IssueIdentityResponse {
        username: issued.credential.username,
        jwt: issued.credential.token,
        expiration_date: issued.credential.expires_at,
    }))
}

/// POST /checkJWT
/// Resolve a session token to its username (plaintext). Unknown tokens, and
/// expired ones when `reject_expired_tokens` is set, are a client error.
pub async fn check_token(
    State(state): State<AppState>,
    _gate: ApiKeyGate,
    body: Bytes,
) -> Result<String, ChatError> {
    let request: TokenCheckRequest = serde_json::from_slice(&body)
        .map_err(|_| ChatError::MalformedInput("Not viable payload".to_string()))?;

    let credential = with_deadline(
        state.settings.persistence_timeout,
        "find_by_token",
        state.store.find_by_token(&request.jwt),
    )
    .await?;

    match credential {
        Some(c) if state.settings.reject_expired_tokens && c.is_expired_at(Utc::now()) => {
            tracing::debug!(username = %c.username, "Rejected expired session token");
            Err(ChatError::NotFound("JWT is not valid".to_string()))
        }
        Some(c) => Ok(c.username),
        None => Err(ChatError::NotFound("JWT is not valid".to_string())),
    }
}
