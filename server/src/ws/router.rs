//! Broadcast Router: one task that fans each inbound message out to every other
//! registered connection.
//!
//! Sessions enqueue on a bounded channel and never wait on a peer. The router
//! pushes into each recipient's bounded outbound queue with `try_send`, so a
//! slow socket only ever loses its own copy of a message.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::{ConnectionId, ConnectionRegistry};
use crate::db::models::ChatMessageRecord;
use crate::error::ChatError;

/// A chat line produced by one session.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub sender_display_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(sender_display_name: &str, body: String) -> Self {
        Self {
            sender_display_name: sender_display_name.to_string(),
            body,
            created_at: Utc::now(),
        }
    }

    /// `<senderName>:<body>`
    pub fn wire_text(&self) -> String {
        format!("{}:{}", self.sender_display_name, self.body)
    }

    pub fn to_record(&self) -> ChatMessageRecord {
        ChatMessageRecord {
            message: self.body.clone(),
            send_by: self.sender_display_name.clone(),
            created_at: self.created_at,
        }
    }
}

/// What gets delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Chat(OutboundMessage),
    /// Presence line sent verbatim, never persisted.
    Notice(String),
}

impl Delivery {
    pub fn wire_text(&self) -> String {
        match self {
            Delivery::Chat(msg) => msg.wire_text(),
            Delivery::Notice(text) => text.clone(),
        }
    }
}

/// One unit of work for the router.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub sender: ConnectionId,
    pub delivery: Delivery,
}

/// Per-broadcast delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Recipients a write was attempted on (everyone but the sender).
    pub attempted: usize,
    /// Attempts that landed in the recipient's queue.
    pub delivered: usize,
}

/// Handle for enqueueing broadcasts. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    tx: mpsc::Sender<Broadcast>,
}

impl BroadcastRouter {
    /// Spawn the router task over `registry`. The task ends once every handle is dropped.
    pub fn spawn(registry: ConnectionRegistry, queue: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = tokio::spawn(run_router(registry, rx));
        (Self { tx }, handle)
    }

    /// A handle whose queue nobody drains; the caller holds the receiving end.
    #[cfg(test)]
    pub(crate) fn detached(queue: usize) -> (Self, mpsc::Receiver<Broadcast>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a broadcast. Waits only for space in the router's own queue.
    pub async fn submit(&self, sender: ConnectionId, delivery: Delivery) -> Result<(), ChatError> {
        self.tx
            .send(Broadcast { sender, delivery })
            .await
            .map_err(|_| ChatError::Persistence("broadcast router stopped".to_string()))
    }
}

async fn run_router(registry: ConnectionRegistry, mut rx: mpsc::Receiver<Broadcast>) {
    tracing::debug!("Broadcast router started");
    while let Some(broadcast) = rx.recv().await {
        let report = fan_out(&registry, &broadcast).await;
        tracing::debug!(
            sender = %broadcast.sender,
            attempted = report.attempted,
            delivered = report.delivered,
            "Broadcast delivered"
        );
    }
    tracing::debug!("Broadcast router stopped");
}

/// Deliver `broadcast` to every registered connection except its sender.
///
/// A full or closed recipient queue is logged and skipped; it never removes the
/// recipient, whose own session owns that decision.
pub async fn fan_out(registry: &ConnectionRegistry, broadcast: &Broadcast) -> FanOutReport {
    let frame = Message::Text(broadcast.delivery.wire_text().into());
    let mut report = FanOutReport::default();

    let conns = registry.snapshot().await;
    for (id, entry) in conns.iter() {
        if *id == broadcast.sender {
            continue;
        }
        report.attempted += 1;
        match entry.sender.try_send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    conn_id = %id,
                    display_name = %entry.display_name,
                    "Outbound queue full, dropping message for recipient"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(
                    conn_id = %id,
                    display_name = %entry.display_name,
                    "Outbound queue closed, skipping recipient"
                );
            }
        }
    }

    report
}
