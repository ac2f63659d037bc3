use axum::{
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};

use crate::state::AppState;
use crate::ws::handshake::{self, PROTOCOL_HEADER};
use crate::ws::session;

/// GET /chat
/// WebSocket upgrade endpoint. Admission is carried in `Sec-WebSocket-Protocol`.
/// Rejected handshakes still upgrade, receive one plaintext line, then close.
pub async fn chat_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let offered = headers
        .get(PROTOCOL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string());

    let outcome = handshake::parse(offered.as_deref(), &state.settings.api_key);

    let mut ws = ws.max_message_size(state.settings.max_message_bytes);
    // Echo the offered protocol back, or browsers drop the upgrade
    if let Some(protocol) = offered {
        ws = ws.protocols([protocol]);
    }

    ws.on_upgrade(move |socket| session::run_session(socket, state, outcome))
}
