use std::sync::Arc;

use crate::config::RelaySettings;
use crate::db::store::ChatStore;
use crate::ws::{BroadcastRouter, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Persistence port (SQLite in production)
    pub store: Arc<dyn ChatStore>,
    /// Session token signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Credentials, limits and deadlines
    pub settings: Arc<RelaySettings>,
    /// Active chat connections
    pub connections: ConnectionRegistry,
    /// Handle to the broadcast task fanning messages out over `connections`
    pub router: BroadcastRouter,
}

impl AppState {
    /// Build the state and spawn the broadcast router. Must run inside a tokio runtime.
    pub fn new(store: Arc<dyn ChatStore>, jwt_secret: Vec<u8>, settings: RelaySettings) -> Self {
        let connections = ConnectionRegistry::new();
        let (router, _handle) = BroadcastRouter::spawn(connections.clone(), settings.router_queue);
        Self {
            store,
            jwt_secret,
            settings: Arc::new(settings),
            connections,
            router,
        }
    }
}
