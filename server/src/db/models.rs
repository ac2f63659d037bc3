//! Row types for the users and chat_messages tables.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Persisted chat line. Immutable once written; history is ordered by `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    pub message: String,
    pub send_by: String,
    pub created_at: DateTime<Utc>,
}

/// User record: the session token a username was issued and its advisory expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCredential {
    pub username: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

impl SessionCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Fixed-width RFC 3339 in UTC, so text ordering in SQLite is chronological.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ChatError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ChatError::Persistence(format!("bad timestamp {:?}: {}", raw, e)))
}
