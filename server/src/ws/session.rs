//! Connection Session: one accepted stream from handshake to teardown.
//!
//! `Connecting → Authorizing → Active → Closing → Closed`, or straight from
//! `Authorizing` to `Closed` on a rejected handshake. While Active, the session
//! runs a reader loop in its own task plus a writer task that drains the
//! bounded outbound queue and a heartbeat task.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::db::store::with_deadline;
use crate::error::ChatError;
use crate::state::AppState;
use crate::ws::handshake::{Handshake, HandshakeRejection};
use crate::ws::router::{Delivery, OutboundMessage};
use crate::ws::{ConnectionId, ConnectionSender};

/// Server sends a WebSocket ping every 30 seconds.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// If no pong arrives within 10 seconds of a ping, the session closes.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authorizing,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authorizing)
                | (Authorizing, Active)
                | (Authorizing, Closed)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }
}

/// Why a session left Active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    StreamEnded,
    ReadError(String),
    WriterGone,
    HeartbeatTimeout,
    Persistence(String),
}

impl CloseReason {
    /// Close frame the server sends for reasons it initiated.
    fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            CloseReason::Persistence(_) => (CLOSE_INTERNAL_ERROR, "Message could not be logged"),
            CloseReason::HeartbeatTimeout => (CLOSE_GOING_AWAY, "Pong timeout"),
            CloseReason::ReadError(_) => (CLOSE_PROTOCOL_ERROR, "Read error"),
            CloseReason::ClientClosed | CloseReason::StreamEnded | CloseReason::WriterGone => {
                return None
            }
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

/// Tracks and logs the state machine for one connection.
#[derive(Debug)]
pub struct Lifecycle {
    pub id: ConnectionId,
    state: SessionState,
}

impl Lifecycle {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(conn_id = %self.id, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }
}

/// Drive one upgraded socket through its whole lifecycle.
pub async fn run_session(
    socket: WebSocket,
    state: AppState,
    outcome: Result<Handshake, HandshakeRejection>,
) {
    let mut lifecycle = Lifecycle::new(ConnectionId::new());
    lifecycle.advance(SessionState::Authorizing);

    let handshake = match outcome {
        Ok(handshake) => handshake,
        Err(rejection) => {
            reject(socket, &state, lifecycle.id, rejection).await;
            lifecycle.advance(SessionState::Closed);
            return;
        }
    };

    let id = lifecycle.id;
    let name = handshake.display_name;
    let (tx, rx) = mpsc::channel::<Message>(state.settings.outbound_buffer);

    if let Err(rejection) = admit(&state, id, &name, tx.clone()).await {
        reject(socket, &state, id, rejection).await;
        lifecycle.advance(SessionState::Closed);
        return;
    }

    lifecycle.advance(SessionState::Active);
    tracing::info!(conn_id = %id, display_name = %name, "Chat session active");

    let (ws_sender, mut ws_receiver) = socket.split();
    let mut writer = tokio::spawn(writer_task(ws_sender, rx, state.settings.write_timeout));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let mut heartbeat = tokio::spawn(heartbeat_task(tx.clone(), pong_rx));

    let reason = read_loop(
        &mut ws_receiver,
        &state,
        id,
        &name,
        &tx,
        &pong_tx,
        &mut writer,
        &mut heartbeat,
    )
    .await;

    lifecycle.advance(SessionState::Closing);
    match &reason {
        CloseReason::Persistence(error) | CloseReason::ReadError(error) => {
            tracing::warn!(conn_id = %id, display_name = %name, error = %error, "Chat session failed");
        }
        other => {
            tracing::info!(conn_id = %id, display_name = %name, reason = ?other, "Chat session closing");
        }
    }

    heartbeat.abort();
    let _ = state.connections.unregister(id).await;

    if reason != CloseReason::WriterGone {
        if let Some(frame) = reason.close_frame() {
            let _ = tx.try_send(Message::Close(Some(frame)));
        }
        drop(tx);
        // Let queued frames drain; the writer ends once every sender is gone
        if timeout(state.settings.write_timeout, &mut writer).await.is_err() {
            writer.abort();
        }
    } else {
        drop(tx);
    }

    // Best effort; remaining peers may already be gone
    let _ = state
        .router
        .submit(id, Delivery::Notice(format!("{} just disconnected", name)))
        .await;

    lifecycle.advance(SessionState::Closed);
    tracing::info!(conn_id = %id, display_name = %name, "Chat session closed");
}

/// Register the connection and queue its join notice under the handshake
/// deadline. The notice waits for room in the router's queue, so a backed-up
/// router is what this deadline catches. An overrun undoes the registration.
async fn admit(
    state: &AppState,
    id: ConnectionId,
    name: &str,
    tx: ConnectionSender,
) -> Result<(), HandshakeRejection> {
    let admission = async {
        if !state.connections.register(id, name, tx).await {
            // Unreachable with v7 ids; refuse rather than replace the entry
            return false;
        }
        if let Err(e) = state
            .router
            .submit(id, Delivery::Notice(format!("{} just connected", name)))
            .await
        {
            tracing::warn!(conn_id = %id, error = %e, "Failed to queue connect notice");
        }
        true
    };

    match timeout(state.settings.handshake_timeout, admission).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(HandshakeRejection::Timeout),
        Err(_) => {
            let _ = state.connections.unregister(id).await;
            Err(HandshakeRejection::Timeout)
        }
    }
}

/// Write the rejection line, then close. Any write error is ignored.
async fn reject(mut socket: WebSocket, state: &AppState, id: ConnectionId, rejection: HandshakeRejection) {
    tracing::warn!(conn_id = %id, reason = rejection.reason(), "Chat handshake rejected");

    let _ = timeout(state.settings.write_timeout, async {
        socket.send(Message::Text(rejection.reason().into())).await?;
        socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: rejection.reason().into(),
            })))
            .await
    })
    .await;
}

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    id: ConnectionId,
    name: &str,
    tx: &ConnectionSender,
    pong_tx: &mpsc::UnboundedSender<()>,
    writer: &mut JoinHandle<()>,
    heartbeat: &mut JoinHandle<()>,
) -> CloseReason {
    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = relay(state, id, name, text.as_str().to_string()).await {
                        return CloseReason::Persistence(e.to_string());
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    let body = String::from_utf8_lossy(&data).into_owned();
                    if let Err(e) = relay(state, id, name, body).await {
                        return CloseReason::Persistence(e.to_string());
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.try_send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(conn_id = %id, frame = ?frame, "Client initiated close");
                    return CloseReason::ClientClosed;
                }
                Some(Err(e)) => return CloseReason::ReadError(e.to_string()),
                None => return CloseReason::StreamEnded,
            },
            _ = &mut *writer => return CloseReason::WriterGone,
            _ = &mut *heartbeat => return CloseReason::HeartbeatTimeout,
        }
    }
}

/// Queue one chat line for fan-out and log it. Fan-out runs on the router task
/// while this awaits the store, so delivery never waits on persistence.
async fn relay(state: &AppState, id: ConnectionId, name: &str, body: String) -> Result<(), ChatError> {
    if body.is_empty() {
        return Ok(());
    }

    let message = OutboundMessage::new(name, body);
    let record = message.to_record();
    state.router.submit(id, Delivery::Chat(message)).await?;

    with_deadline(
        state.settings.persistence_timeout,
        "append_message",
        state.store.append_message(record),
    )
    .await
}

/// Drains the outbound queue into the socket, one deadline per write.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    write_timeout: Duration,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        match timeout(write_timeout, ws_sender.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                tracing::warn!("WebSocket write exceeded deadline");
                break;
            }
        }
        if closing {
            break;
        }
    }
}

/// Pings on an interval and returns when a pong is missed or the queue is gone.
async fn heartbeat_task(tx: ConnectionSender, mut pong_rx: mpsc::UnboundedReceiver<()>) {
    let mut ping_timer = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Only a pong that follows this ping counts
        while pong_rx.try_recv().is_ok() {}

        match timeout(PONG_TIMEOUT, tx.send(Message::Ping(vec![1, 2, 3, 4].into()))).await {
            Ok(Ok(())) => {}
            _ => break,
        }

        match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                break;
            }
        }
    }
}
