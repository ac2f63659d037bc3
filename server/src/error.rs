//! Error taxonomy shared by the HTTP handlers, the store and the stream sessions.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Every failure the relay can surface.
///
/// Handlers return it directly; sessions log it and tear down. Nothing in the
/// core retries on any of these.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Missing or mismatched shared secret.
    #[error("{0}")]
    Authorization(String),

    /// Undecodable body or handshake.
    #[error("{0}")]
    MalformedInput(String),

    /// Backend unavailable or a read/write against it failed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Token or user lookup miss.
    #[error("{0}")]
    NotFound(String),

    /// An external call overran its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Session token could not be signed.
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Authorization(_) => StatusCode::UNAUTHORIZED,
            ChatError::MalformedInput(_) | ChatError::NotFound(_) => StatusCode::BAD_REQUEST,
            ChatError::Persistence(_) | ChatError::Timeout(_) | ChatError::Token(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        ChatError::Persistence(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::Persistence(format!("blocking task failed: {}", err))
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the log
        let body = match &self {
            ChatError::Authorization(msg)
            | ChatError::MalformedInput(msg)
            | ChatError::NotFound(msg) => msg.clone(),
            ChatError::Persistence(_) | ChatError::Timeout(_) | ChatError::Token(_) => {
                tracing::error!(error = %self, "request failed");
                "Internal Server Error".to_string()
            }
        };
        (status, body).into_response()
    }
}
