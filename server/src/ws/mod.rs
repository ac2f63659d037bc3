pub mod handler;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod session;

use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

pub use registry::ConnectionRegistry;
pub use router::BroadcastRouter;

/// Sender half of a connection's bounded outbound queue.
/// The router clones it out of the registry to push frames to that client.
pub type ConnectionSender = mpsc::Sender<axum::extract::ws::Message>;

/// Identity of one accepted stream for the life of its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
