//! Connection Registry: who is connected right now, and under what name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard};

use super::{ConnectionId, ConnectionSender};

/// One admitted connection.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub display_name: String,
    pub sender: ConnectionSender,
}

/// Live connections keyed by id.
///
/// An entry exists exactly while its session is Active. Inserts and removals
/// take the write lock; fan-out iterates under the read lock.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, RegistryEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. Returns false, leaving the registry untouched, if `id`
    /// is already present.
    pub async fn register(&self, id: ConnectionId, display_name: &str, sender: ConnectionSender) -> bool {
        let mut conns = self.inner.write().await;
        if conns.contains_key(&id) {
            return false;
        }
        let _ = conns.insert(
            id,
            RegistryEntry {
                display_name: display_name.to_string(),
                sender,
            },
        );
        tracing::debug!(conn_id = %id, display_name, connections = conns.len(), "Connection registered");
        true
    }

    /// Remove an entry if present. Idempotent.
    pub async fn unregister(&self, id: ConnectionId) -> Option<RegistryEntry> {
        let removed = self.inner.write().await.remove(&id);
        if removed.is_some() {
            tracing::debug!(conn_id = %id, "Connection unregistered");
        }
        removed
    }

    /// Consistent view of the membership, held under the shared lock for the
    /// duration of one fan-out. Registration and removal wait until it drops.
    pub(crate) async fn snapshot(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, RegistryEntry>> {
        self.inner.read().await
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Display names of everyone connected, sorted.
    pub async fn display_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .await
            .values()
            .map(|e| e.display_name.clone())
            .collect();
        names.sort();
        names
    }
}
