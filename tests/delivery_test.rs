//! Integration tests for direct-message fan-out, delivery-state
//! transitions, scheduled messages, and disappearing messages.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

async fn start_test_server() -> (String, SocketAddr) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = courier_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = courier_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = courier_server::state::AppState {
        db,
        jwt_secret,
        connections: courier_server::ws::ConnectionRegistry::new(),
    };

    let app = courier_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    let base_url = format!("http://{}", addr);
    (base_url, addr)
}

async fn register_user(base_url: &str, username: &str, display_name: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/auth/register", base_url))
        .json(&json!({
            "username": username,
            "display_name": display_name,
            "password": "hunter2",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201, "Registration failed for {}", username);
    let body: Value = resp.json().await.unwrap();
    (
        body["user_id"].as_str().unwrap().to_string(),
        body["access_token"].as_str().unwrap().to_string(),
    )
}

async fn connect_ws(addr: SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

async fn wait_for_event(read: &mut WsRead, event_name: &str) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {}", event_name))
            .unwrap_or_else(|| panic!("Stream ended waiting for {}", event_name))
            .expect("WebSocket error");

        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).expect("Invalid JSON frame");
            if value["event"] == event_name {
                return value;
            }
        }
    }
}

async fn assert_no_event(read: &mut WsRead, event_name: &str, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match tokio::time::timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_ne!(
                    value["event"], event_name,
                    "Unexpected {} event: {}",
                    event_name, value
                );
            }
            Ok(Some(Ok(_))) => continue,
            _ => return,
        }
    }
}

/// POST a direct message and return the created payload.
async fn post_message(base_url: &str, token: &str, body: Value) -> Value {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "Message creation failed");
    resp.json().await.unwrap()
}

async fn fetch_history(base_url: &str, token: &str, peer_id: &str) -> Value {
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/messages/{}", base_url, peer_id))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "History fetch failed");
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_new_message_fans_out_to_both_parties() {
    let (base_url, addr) = start_test_server().await;
    let (alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _aw, mut alice_read) = connect_ws(addr, &alice_token).await;
    let (mut _bw, mut bob_read) = connect_ws(addr, &bob_token).await;

    let created = post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "hello bob"}),
    )
    .await;
    assert_eq!(created["status"], "sent");
    assert_eq!(created["senderId"], alice_id);

    // Receiver gets the live event, sender gets the echo
    let event = wait_for_event(&mut bob_read, "newMessage").await;
    assert_eq!(event["message"]["content"], "hello bob");
    assert_eq!(event["message"]["id"], created["id"]);

    let event = wait_for_event(&mut alice_read, "newMessage").await;
    assert_eq!(event["message"]["id"], created["id"]);
}

#[tokio::test]
async fn test_self_message_delivers_exactly_once() {
    let (base_url, addr) = start_test_server().await;
    let (alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;

    let (mut _aw, mut alice_read) = connect_ws(addr, &alice_token).await;

    // Sender and receiver are the same user; the recipient set collapses
    let created = post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": alice_id, "content": "note to self"}),
    )
    .await;

    let event = wait_for_event(&mut alice_read, "newMessage").await;
    assert_eq!(event["message"]["id"], created["id"]);
    assert_no_event(&mut alice_read, "newMessage", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_message_to_unknown_receiver_is_404() {
    let (base_url, _addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/messages", base_url))
        .bearer_auth(&alice_token)
        .json(&json!({"receiverId": "nonexistent", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_offline_recipient_message_persists_without_live_event() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _aw, mut alice_read) = connect_ws(addr, &alice_token).await;

    // Bob is offline; creation still succeeds and the sender echo still fires
    let created = post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "catch up later"}),
    )
    .await;
    wait_for_event(&mut alice_read, "newMessage").await;

    // Bob finds it in history once he comes back
    let history = fetch_history(
        &base_url,
        &bob_token,
        created["senderId"].as_str().unwrap(),
    )
    .await;
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], created["id"]);
}

#[tokio::test]
async fn test_delivered_then_read_flow_notifies_sender() {
    let (base_url, addr) = start_test_server().await;
    let (alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _aw, mut alice_read) = connect_ws(addr, &alice_token).await;
    post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "first"}),
    )
    .await;
    post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "second"}),
    )
    .await;

    let client = reqwest::Client::new();

    // Bob acknowledges delivery of everything from Alice
    let resp = client
        .post(format!("{}/api/messages/delivered", base_url))
        .bearer_auth(&bob_token)
        .json(&json!({"senderId": alice_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["updated"], 2);

    let event = wait_for_event(&mut alice_read, "messagesDelivered").await;
    assert_eq!(event["receiverId"], bob_id);
    assert!(event["timestamp"].is_string());

    // Then marks them read
    let resp = client
        .post(format!("{}/api/messages/read", base_url))
        .bearer_auth(&bob_token)
        .json(&json!({"senderId": alice_id}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["updated"], 2);

    let event = wait_for_event(&mut alice_read, "messagesRead").await;
    assert_eq!(event["receiverId"], bob_id);

    // History reflects the terminal state with ordered timestamps
    let history = fetch_history(&base_url, &alice_token, &bob_id).await;
    for message in history["messages"].as_array().unwrap() {
        assert_eq!(message["status"], "read");
        let delivered = message["deliveredAt"].as_str().unwrap();
        let read = message["readAt"].as_str().unwrap();
        assert!(delivered <= read);
    }
}

#[tokio::test]
async fn test_read_skips_ahead_from_sent() {
    let (base_url, addr) = start_test_server().await;
    let (alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _aw, mut alice_read) = connect_ws(addr, &alice_token).await;
    post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "skip ahead"}),
    )
    .await;

    // Straight to read without an intermediate delivered call
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/messages/read", base_url))
        .bearer_auth(&bob_token)
        .json(&json!({"senderId": alice_id}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["updated"], 1);

    wait_for_event(&mut alice_read, "messagesRead").await;

    let history = fetch_history(&base_url, &alice_token, &bob_id).await;
    let message = &history["messages"].as_array().unwrap()[0];
    assert_eq!(message["status"], "read");
    // Skip-ahead stamps both timestamps from the same instant
    assert_eq!(message["deliveredAt"], message["readAt"]);
}

#[tokio::test]
async fn test_empty_transition_set_fires_no_notification() {
    let (base_url, addr) = start_test_server().await;
    let (alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (_bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _aw, mut alice_read) = connect_ws(addr, &alice_token).await;

    // No pending messages from Alice: 200, zero rows, no live event
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/messages/delivered", base_url))
        .bearer_auth(&bob_token)
        .json(&json!({"senderId": alice_id}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["updated"], 0);

    assert_no_event(
        &mut alice_read,
        "messagesDelivered",
        Duration::from_millis(300),
    )
    .await;
}

#[tokio::test]
async fn test_scheduled_future_message_is_withheld_from_fan_out() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _aw, mut _alice_read) = connect_ws(addr, &alice_token).await;
    let (mut _bw, mut bob_read) = connect_ws(addr, &bob_token).await;

    let scheduled_at = (Utc::now() + ChronoDuration::hours(1)).to_rfc3339();
    let created = post_message(
        &base_url,
        &alice_token,
        json!({
            "receiverId": bob_id,
            "content": "future news",
            "scheduledAt": scheduled_at,
        }),
    )
    .await;
    assert_eq!(created["isScheduled"], true);

    // Not due: no live event for anyone
    assert_no_event(&mut bob_read, "newMessage", Duration::from_millis(400)).await;

    // The sender can see the pending row in history; the receiver cannot
    let history = fetch_history(&base_url, &alice_token, &bob_id).await;
    assert_eq!(history["messages"].as_array().unwrap().len(), 1);

    let history = fetch_history(
        &base_url,
        &bob_token,
        created["senderId"].as_str().unwrap(),
    )
    .await;
    assert_eq!(history["messages"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_past_scheduled_message_delivers_immediately() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _bw, mut bob_read) = connect_ws(addr, &bob_token).await;

    let scheduled_at = (Utc::now() - ChronoDuration::minutes(5)).to_rfc3339();
    post_message(
        &base_url,
        &alice_token,
        json!({
            "receiverId": bob_id,
            "content": "already due",
            "scheduledAt": scheduled_at,
        }),
    )
    .await;

    let event = wait_for_event(&mut bob_read, "newMessage").await;
    assert_eq!(event["message"]["content"], "already due");
}

#[tokio::test]
async fn test_disappearing_message_expiry_is_creation_plus_window() {
    let (base_url, _addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, _bob_token) = register_user(&base_url, "bob", "Bob").await;

    let created = post_message(
        &base_url,
        &alice_token,
        json!({
            "receiverId": bob_id,
            "content": "this will vanish",
            "disappearAfterMinutes": 5,
        }),
    )
    .await;

    let created_at: DateTime<Utc> = created["createdAt"]
        .as_str()
        .unwrap()
        .parse()
        .expect("createdAt should be RFC 3339");
    let expires_at: DateTime<Utc> = created["expiresAt"]
        .as_str()
        .unwrap()
        .parse()
        .expect("expiresAt should be RFC 3339");
    assert_eq!(expires_at - created_at, ChronoDuration::minutes(5));
}

#[tokio::test]
async fn test_expired_messages_are_purged_on_history_read() {
    let (base_url, _addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, _bob_token) = register_user(&base_url, "bob", "Bob").await;

    // Zero-minute window expires at creation time
    post_message(
        &base_url,
        &alice_token,
        json!({
            "receiverId": bob_id,
            "content": "gone already",
            "disappearAfterMinutes": 0,
        }),
    )
    .await;
    post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "still here"}),
    )
    .await;

    let history = fetch_history(&base_url, &alice_token, &bob_id).await;
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "still here");
}

#[tokio::test]
async fn test_edit_message_fans_out_to_both_parties() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _bw, mut bob_read) = connect_ws(addr, &bob_token).await;

    let created = post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "typo hre"}),
    )
    .await;
    wait_for_event(&mut bob_read, "newMessage").await;

    let client = reqwest::Client::new();
    let resp = client
        .put(format!(
            "{}/api/messages/{}",
            base_url,
            created["id"].as_str().unwrap()
        ))
        .bearer_auth(&alice_token)
        .json(&json!({"content": "typo here"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = wait_for_event(&mut bob_read, "messageEdited").await;
    assert_eq!(event["message"]["content"], "typo here");
    assert_eq!(event["message"]["edited"], true);

    // Only the author may edit
    let resp = client
        .put(format!(
            "{}/api/messages/{}",
            base_url,
            created["id"].as_str().unwrap()
        ))
        .bearer_auth(&bob_token)
        .json(&json!({"content": "hijacked"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_reaction_toggle_fans_out() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _aw, mut alice_read) = connect_ws(addr, &alice_token).await;

    let created = post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "react to me"}),
    )
    .await;
    wait_for_event(&mut alice_read, "newMessage").await;

    let client = reqwest::Client::new();
    let url = format!(
        "{}/api/messages/{}/reactions",
        base_url,
        created["id"].as_str().unwrap()
    );

    // First toggle adds
    let resp = client
        .post(&url)
        .bearer_auth(&bob_token)
        .json(&json!({"emoji": "👍"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], false);

    let event = wait_for_event(&mut alice_read, "messageReaction").await;
    assert_eq!(event["emoji"], "👍");
    assert_eq!(event["userId"], bob_id);
    assert_eq!(event["removed"], false);

    // Second toggle removes
    let resp = client
        .post(&url)
        .bearer_auth(&bob_token)
        .json(&json!({"emoji": "👍"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["removed"], true);

    let event = wait_for_event(&mut alice_read, "messageReaction").await;
    assert_eq!(event["removed"], true);
}

#[tokio::test]
async fn test_pin_toggle_fans_out() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, bob_token) = register_user(&base_url, "bob", "Bob").await;

    let (mut _bw, mut bob_read) = connect_ws(addr, &bob_token).await;

    let created = post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "pin me"}),
    )
    .await;
    wait_for_event(&mut bob_read, "newMessage").await;

    let client = reqwest::Client::new();
    let url = format!(
        "{}/api/messages/{}/pin",
        base_url,
        created["id"].as_str().unwrap()
    );

    let resp = client.post(&url).bearer_auth(&alice_token).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["pinned"], true);

    let event = wait_for_event(&mut bob_read, "messagePinned").await;
    assert_eq!(event["pinned"], true);
    assert_eq!(event["messageId"], created["id"]);

    // Toggling again unpins
    let resp = client.post(&url).bearer_auth(&alice_token).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["pinned"], false);
}

#[tokio::test]
async fn test_non_participant_cannot_pin_or_react() {
    let (base_url, addr) = start_test_server().await;
    let (_alice_id, alice_token) = register_user(&base_url, "alice", "Alice").await;
    let (bob_id, _bob_token) = register_user(&base_url, "bob", "Bob").await;
    let (_carol_id, carol_token) = register_user(&base_url, "carol", "Carol").await;

    let (mut _aw, mut alice_read) = connect_ws(addr, &alice_token).await;

    let created = post_message(
        &base_url,
        &alice_token,
        json!({"receiverId": bob_id, "content": "private"}),
    )
    .await;
    wait_for_event(&mut alice_read, "newMessage").await;

    // Carol is not part of the conversation
    let client = reqwest::Client::new();
    let resp = client
        .post(format!(
            "{}/api/messages/{}/pin",
            base_url,
            created["id"].as_str().unwrap()
        ))
        .bearer_auth(&carol_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .post(format!(
            "{}/api/messages/{}/reactions",
            base_url,
            created["id"].as_str().unwrap()
        ))
        .bearer_auth(&carol_token)
        .json(&json!({"emoji": "👀"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Nothing was toggled and no event fanned out to the participants
    assert_no_event(&mut alice_read, "messagePinned", Duration::from_millis(300)).await;

    // A participant can still pin
    let resp = client
        .post(format!(
            "{}/api/messages/{}/pin",
            base_url,
            created["id"].as_str().unwrap()
        ))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["pinned"], true);
}

#[tokio::test]
async fn test_history_requires_auth() {
    let (base_url, _addr) = start_test_server().await;
    let (_alice_id, _alice_token) = register_user(&base_url, "alice", "Alice").await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/messages/alice", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}
