//! Integration tests for the chat stream: handshake, fan-out, persistence and teardown.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::config::RelaySettings;
use relay_server::db::models::{ChatMessageRecord, SessionCredential};
use relay_server::db::store::{ChatStore, IssuedIdentity, SqliteStore};
use relay_server::error::ChatError;
use relay_server::state::AppState;

const TEST_API_KEY: &str = "test-api-key";

type WsRead = futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type WsWrite =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

fn test_settings() -> RelaySettings {
    RelaySettings {
        api_key: TEST_API_KEY.to_string(),
        auth_token: "test-auth-token".to_string(),
        ..RelaySettings::default()
    }
}

/// Helper: start the server on a random port over `store` (SQLite in a temp dir by default).
async fn start_test_server(store: Option<Arc<dyn ChatStore>>) -> (SocketAddr, AppState) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let store = match store {
        Some(store) => store,
        None => {
            let db = relay_server::db::init_db(&data_dir).expect("Failed to init DB");
            Arc::new(SqliteStore::new(db)) as Arc<dyn ChatStore>
        }
    };

    let state = AppState::new(store, vec![9u8; 32], test_settings());
    let app = relay_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    (addr, state)
}

/// Open `/chat`, offering `protocol` in Sec-WebSocket-Protocol when given.
async fn connect(addr: SocketAddr, protocol: Option<&str>) -> (WsWrite, WsRead) {
    let mut request = format!("ws://{}/chat", addr).into_client_request().unwrap();
    if let Some(protocol) = protocol {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_str(protocol).unwrap());
    }
    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

async fn join(addr: SocketAddr, state: &AppState, name: &str) -> (WsWrite, WsRead) {
    let before = state.connections.len().await;
    let pair = connect(addr, Some(&format!("{}.{}", TEST_API_KEY, name))).await;
    wait_for_connections(state, before + 1).await;
    pair
}

/// Poll the registry until it holds `expected` connections.
async fn wait_for_connections(state: &AppState, expected: usize) {
    for _ in 0..100 {
        if state.connections.len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "Registry never reached {} connections (has {})",
        expected,
        state.connections.len().await
    );
}

/// Read text frames until one equals `expected`; returns the lines seen before it.
async fn recv_until(read: &mut WsRead, expected: &str) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    let mut earlier = Vec::new();
    loop {
        let msg = tokio::time::timeout_at(deadline, read.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {:?}", expected));
        match msg {
            Some(Ok(Message::Text(text))) if text.as_str() == expected => return earlier,
            Some(Ok(Message::Text(text))) => earlier.push(text.as_str().to_string()),
            Some(Ok(_)) => continue,
            other => panic!("Stream ended while waiting for {:?}: {:?}", expected, other),
        }
    }
}

/// Collect text frames until the stream goes quiet for `quiet`.
async fn drain_texts(read: &mut WsRead, quiet: Duration) -> Vec<String> {
    let mut texts = Vec::new();
    while let Ok(Some(Ok(msg))) = tokio::time::timeout(quiet, read.next()).await {
        if let Message::Text(text) = msg {
            texts.push(text.as_str().to_string());
        }
    }
    texts
}

/// First text frame, then assert the stream closes.
async fn expect_rejection(read: &mut WsRead, reason: &str) {
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected rejection line within timeout");
    match msg {
        Some(Ok(Message::Text(text))) => assert_eq!(text.as_str(), reason),
        other => panic!("Expected rejection text, got: {:?}", other),
    }

    let next = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close within timeout");
    match next {
        Some(Ok(msg)) => assert!(msg.is_close(), "Expected close, got: {:?}", msg),
        Some(Err(_)) | None => {}
    }
}

#[tokio::test]
async fn test_two_clients_exchange_message() {
    let (addr, state) = start_test_server(None).await;

    let (mut alice_write, mut alice_read) = join(addr, &state, "alice").await;
    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;

    recv_until(&mut alice_read, "bob just connected").await;

    alice_write.send(Message::text("hi")).await.unwrap();
    recv_until(&mut bob_read, "alice:hi").await;

    // The message is logged with sender and timestamp
    let record = wait_for_record(&state, "hi").await;
    assert_eq!(record.send_by, "alice");
    let age = chrono::Utc::now() - record.created_at;
    assert!(age < chrono::Duration::seconds(10), "createdAt should be ~now");
}

#[tokio::test]
async fn test_sender_does_not_receive_own_message() {
    let (addr, state) = start_test_server(None).await;

    let (mut alice_write, mut alice_read) = join(addr, &state, "alice").await;
    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;

    alice_write.send(Message::text("echo?")).await.unwrap();
    recv_until(&mut bob_read, "alice:echo?").await;

    let alice_saw = drain_texts(&mut alice_read, Duration::from_millis(300)).await;
    assert!(
        !alice_saw.iter().any(|t| t == "alice:echo?"),
        "Sender received its own message: {:?}",
        alice_saw
    );
}

#[tokio::test]
async fn test_broadcast_reaches_every_other_client() {
    let (addr, state) = start_test_server(None).await;

    let (mut alice_write, _alice_read) = join(addr, &state, "alice").await;
    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;
    let (_carol_write, mut carol_read) = join(addr, &state, "carol").await;

    assert_eq!(state.connections.display_names().await, vec!["alice", "bob", "carol"]);

    alice_write.send(Message::text("hello all")).await.unwrap();
    recv_until(&mut bob_read, "alice:hello all").await;
    recv_until(&mut carol_read, "alice:hello all").await;
}

#[tokio::test]
async fn test_messages_from_one_client_arrive_in_order() {
    let (addr, state) = start_test_server(None).await;

    let (mut alice_write, _alice_read) = join(addr, &state, "alice").await;
    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;

    for i in 0..5 {
        alice_write.send(Message::text(format!("m{}", i))).await.unwrap();
    }

    let mut seen = Vec::new();
    while seen.len() < 5 {
        let texts = drain_texts(&mut bob_read, Duration::from_millis(500)).await;
        assert!(!texts.is_empty(), "Bob stopped receiving after {:?}", seen);
        seen.extend(texts.into_iter().filter(|t| t.starts_with("alice:m")));
    }
    assert_eq!(seen, vec!["alice:m0", "alice:m1", "alice:m2", "alice:m3", "alice:m4"]);
}

#[tokio::test]
async fn test_handshake_without_separator_is_rejected() {
    let (addr, state) = start_test_server(None).await;

    let (_write, mut read) = connect(addr, Some("test-api-keyalice")).await;
    expect_rejection(&mut read, "Malformed handshake").await;
    assert!(state.connections.is_empty().await);
}

#[tokio::test]
async fn test_handshake_without_header_is_rejected() {
    let (addr, state) = start_test_server(None).await;

    let (_write, mut read) = connect(addr, None).await;
    expect_rejection(&mut read, "Malformed handshake").await;
    assert!(state.connections.is_empty().await);
}

#[tokio::test]
async fn test_handshake_with_empty_name_is_rejected() {
    let (addr, state) = start_test_server(None).await;

    let (_write, mut read) = connect(addr, Some("test-api-key.%20")).await;
    expect_rejection(&mut read, "Invalid Username").await;
    assert!(state.connections.is_empty().await);
}

#[tokio::test]
async fn test_handshake_with_wrong_key_is_rejected() {
    let (addr, state) = start_test_server(None).await;

    let (_write, mut read) = connect(addr, Some("wrong-key.alice")).await;
    expect_rejection(&mut read, "Invalid API key").await;
    assert!(state.connections.is_empty().await);
}

#[tokio::test]
async fn test_handshake_with_undecodable_name_is_rejected() {
    let (addr, state) = start_test_server(None).await;

    let (_write, mut read) = connect(addr, Some("test-api-key.%FF")).await;
    expect_rejection(&mut read, "Username decoding error").await;
    assert!(state.connections.is_empty().await);
}

#[tokio::test]
async fn test_handshake_decodes_display_name() {
    let (addr, state) = start_test_server(None).await;

    let (_write, _read) = join(addr, &state, "J%C3%BCrgen%20M").await;
    assert_eq!(state.connections.display_names().await, vec!["Jürgen M"]);
}

#[tokio::test]
async fn test_connection_cleanup_on_disconnect() {
    let (addr, state) = start_test_server(None).await;

    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;
    {
        let (mut alice_write, _alice_read) = join(addr, &state, "alice").await;
        alice_write.send(Message::Close(None)).await.unwrap();
    }

    wait_for_connections(&state, 1).await;
    assert_eq!(state.connections.display_names().await, vec!["bob"]);
    recv_until(&mut bob_read, "alice just disconnected").await;

    // Reconnecting with the same name is a fresh session
    let (_again_write, _again_read) = join(addr, &state, "alice").await;
    assert_eq!(state.connections.len().await, 2);
}

/// Poll the store until a record with `body` shows up.
async fn wait_for_record(state: &AppState, body: &str) -> ChatMessageRecord {
    for _ in 0..50 {
        let records = state.store.latest_messages(20).await.unwrap();
        if let Some(record) = records.into_iter().find(|r| r.message == body) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Message {:?} was never persisted", body);
}

#[tokio::test]
async fn test_binary_frame_is_relayed_as_text() {
    let (addr, state) = start_test_server(None).await;

    let (mut alice_write, _alice_read) = join(addr, &state, "alice").await;
    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;

    alice_write
        .send(Message::Binary(vec![b'h', 0xFF, b'i'].into()))
        .await
        .unwrap();

    recv_until(&mut bob_read, "alice:h\u{FFFD}i").await;
    let record = wait_for_record(&state, "h\u{FFFD}i").await;
    assert_eq!(record.send_by, "alice");
}

#[tokio::test]
async fn test_empty_frame_is_ignored() {
    let (addr, state) = start_test_server(None).await;

    let (mut alice_write, _alice_read) = join(addr, &state, "alice").await;
    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;

    alice_write.send(Message::text("")).await.unwrap();
    alice_write.send(Message::Binary(Vec::<u8>::new().into())).await.unwrap();
    alice_write.send(Message::text("after")).await.unwrap();

    let earlier = recv_until(&mut bob_read, "alice:after").await;
    assert!(!earlier.iter().any(|t| t == "alice:"), "Empty frame was broadcast: {:?}", earlier);

    wait_for_record(&state, "after").await;
    let records = state.store.latest_messages(20).await.unwrap();
    assert!(records.iter().all(|r| !r.message.is_empty()), "Empty frame was persisted");
    assert_eq!(records.len(), 1);

    // The sender's session is still up
    assert_eq!(state.connections.len().await, 2);
}

#[tokio::test]
async fn test_oversized_frame_ends_sender_session() {
    let (addr, state) = start_test_server(None).await;

    let (mut alice_write, mut alice_read) = join(addr, &state, "alice").await;
    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;

    let limit = RelaySettings::default().max_message_bytes;
    let _ = alice_write.send(Message::text("x".repeat(limit + 1))).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match tokio::time::timeout_at(deadline, alice_read.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => {
                if let Some(frame) = frame {
                    assert_eq!(u16::from(frame.code), 1002);
                }
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => panic!("Oversized frame did not end the session"),
        }
    }

    wait_for_connections(&state, 1).await;
    assert_eq!(state.connections.display_names().await, vec!["bob"]);
    let earlier = recv_until(&mut bob_read, "alice just disconnected").await;
    assert!(!earlier.iter().any(|t| t.starts_with("alice:x")));
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let (addr, state) = start_test_server(None).await;
    let (mut write, mut read) = join(addr, &state, "pinger").await;

    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");

    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

/// Store whose message log is down; everything else is empty.
struct LogDownStore;

#[async_trait]
impl ChatStore for LogDownStore {
    async fn issue_identity(&self, candidate: SessionCredential) -> Result<IssuedIdentity, ChatError> {
        Ok(IssuedIdentity {
            credential: candidate,
            created: true,
        })
    }

    async fn find_by_token(&self, _token: &str) -> Result<Option<SessionCredential>, ChatError> {
        Ok(None)
    }

    async fn append_message(&self, _record: ChatMessageRecord) -> Result<(), ChatError> {
        Err(ChatError::Persistence("backend unavailable".to_string()))
    }

    async fn latest_messages(&self, _limit: usize) -> Result<Vec<ChatMessageRecord>, ChatError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_persistence_failure_closes_only_the_sender() {
    let (addr, state) = start_test_server(Some(Arc::new(LogDownStore))).await;

    let (mut alice_write, mut alice_read) = join(addr, &state, "alice").await;
    let (_bob_write, mut bob_read) = join(addr, &state, "bob").await;

    alice_write.send(Message::text("hi")).await.unwrap();

    // Delivery to others is unaffected
    recv_until(&mut bob_read, "alice:hi").await;

    // Sender's session is torn down
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match tokio::time::timeout_at(deadline, alice_read.next()).await {
            Ok(Some(Ok(Message::Close(frame)))) => {
                if let Some(frame) = frame {
                    assert_eq!(u16::from(frame.code), 1011);
                }
                break;
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => panic!("Sender session was not closed"),
        }
    }

    wait_for_connections(&state, 1).await;
    assert_eq!(state.connections.display_names().await, vec!["bob"]);
    recv_until(&mut bob_read, "alice just disconnected").await;
}
