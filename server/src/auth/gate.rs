//! Credential Gate: shared-secret checks in front of every call into the relay.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ChatError;
use crate::state::AppState;

/// Header carrying the general API secret.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Header carrying the privileged identity-issuance secret.
pub const AUTH_TOKEN_HEADER: &str = "Authorization";

/// True iff `presented` equals the configured secret.
///
/// An empty configured secret authorizes nothing. Comparison time does not
/// depend on where the first mismatching byte is.
pub fn authorize(presented: Option<&str>, expected: &str) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    if expected.is_empty() || presented.len() != expected.len() {
        return false;
    }
    presented
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Extractor that admits requests carrying the general API secret in `X-API-Key`.
#[derive(Debug, Clone, Copy)]
pub struct ApiKeyGate;

impl FromRequestParts<AppState> for ApiKeyGate {
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if authorize(header(parts, API_KEY_HEADER), &state.settings.api_key) {
            Ok(ApiKeyGate)
        } else {
            tracing::warn!(path = %parts.uri.path(), "rejected request with invalid API key");
            Err(ChatError::Authorization("Invalid API Key".to_string()))
        }
    }
}

/// Extractor that admits requests carrying the privileged secret in `Authorization`.
#[derive(Debug, Clone, Copy)]
pub struct AuthTokenGate;

impl FromRequestParts<AppState> for AuthTokenGate {
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if authorize(header(parts, AUTH_TOKEN_HEADER), &state.settings.auth_token) {
            Ok(AuthTokenGate)
        } else {
            tracing::warn!(path = %parts.uri.path(), "rejected request with invalid auth token");
            Err(ChatError::Authorization("Invalid Auth Token".to_string()))
        }
    }
}
