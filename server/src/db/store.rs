//! Persistence port and its SQLite implementation.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::db::models::{format_timestamp, parse_timestamp, ChatMessageRecord, SessionCredential};
use crate::db::DbPool;
use crate::error::ChatError;

/// Outcome of a lookup-or-create on a username.
#[derive(Debug, Clone)]
pub struct IssuedIdentity {
    pub credential: SessionCredential,
    /// False when an existing record was returned.
    pub created: bool,
}

/// What the relay needs from durable storage.
#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    /// Return the stored credential for `candidate.username`, or persist `candidate`
    /// if none exists. Atomic: concurrent calls for one username create one record.
    async fn issue_identity(&self, candidate: SessionCredential) -> Result<IssuedIdentity, ChatError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionCredential>, ChatError>;

    async fn append_message(&self, record: ChatMessageRecord) -> Result<(), ChatError>;

    /// Most recent `limit` records, newest first.
    async fn latest_messages(&self, limit: usize) -> Result<Vec<ChatMessageRecord>, ChatError>;
}

/// Run a store call under a deadline; overrunning it is a `Timeout` failure.
pub async fn with_deadline<T, F>(deadline: Duration, op: &'static str, fut: F) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(op, deadline_ms = deadline.as_millis() as u64, "store call exceeded deadline");
            Err(ChatError::Timeout(op))
        }
    }
}

/// `ChatStore` over the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the locked connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, ChatError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| ChatError::Persistence(format!("DB lock error: {}", e)))?;
            f(&mut conn)
        })
        .await?
    }
}

fn credential_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_credential(
    (username, token, expires_at, created_at): (String, String, String, String),
) -> Result<SessionCredential, ChatError> {
    Ok(SessionCredential {
        username,
        token,
        expires_at: parse_timestamp(&expires_at)?,
        issued_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn issue_identity(&self, candidate: SessionCredential) -> Result<IssuedIdentity, ChatError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let existing = tx
                .query_row(
                    "SELECT name, jwt, expires_at, created_at FROM users WHERE name = ?1",
                    rusqlite::params![candidate.username],
                    credential_from_row,
                )
                .optional()?;

            if let Some(row) = existing {
                return Ok(IssuedIdentity {
                    credential: into_credential(row)?,
                    created: false,
                });
            }

            tx.execute(
                "INSERT INTO users (id, name, jwt, expires_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    Uuid::now_v7().to_string(),
                    candidate.username,
                    candidate.token,
                    format_timestamp(&candidate.expires_at),
                    format_timestamp(&candidate.issued_at),
                ],
            )?;
            tx.commit()?;

            Ok(IssuedIdentity {
                credential: candidate,
                created: true,
            })
        })
        .await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<SessionCredential>, ChatError> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT name, jwt, expires_at, created_at FROM users WHERE jwt = ?1",
                rusqlite::params![token],
                credential_from_row,
            )
            .optional()?
            .map(into_credential)
            .transpose()
        })
        .await
    }

    async fn append_message(&self, record: ChatMessageRecord) -> Result<(), ChatError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO chat_messages (message, send_by, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![record.message, record.send_by, format_timestamp(&record.created_at)],
            )?;
            Ok(())
        })
        .await
    }

    async fn latest_messages(&self, limit: usize) -> Result<Vec<ChatMessageRecord>, ChatError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT message, send_by, created_at FROM chat_messages
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut records = Vec::with_capacity(limit.min(64));
            for row in rows {
                let (message, send_by, created_at) = row?;
                records.push(ChatMessageRecord {
                    message,
                    send_by,
                    created_at: parse_timestamp(&created_at)?,
                });
            }
            Ok(records)
        })
        .await
    }
}

/// A credential for `username` valid from now for `ttl`.
///
/// Timestamps are cut to the stored precision so a fresh credential equals its
/// read-back form.
pub fn candidate_credential(username: &str, token: String, ttl: chrono::Duration) -> SessionCredential {
    let issued_at = Utc::now().trunc_subsecs(6);
    SessionCredential {
        username: username.to_string(),
        token,
        expires_at: issued_at + ttl,
        issued_at,
    }
}
