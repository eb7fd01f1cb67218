//! JSON wire protocol for the live connection.
//!
//! Every frame is a text message carrying an `event` tag plus the event's
//! fields. Client events are decoded and dispatched to the typing and call
//! handlers; everything else a client does goes through the REST API, which
//! pushes server events back through this protocol after storage success.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::chat::{calls, typing};
use crate::db::models;
use crate::state::AppState;

/// Events a client may send over the live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing { receiver_id: String },

    #[serde(rename = "stopTyping", rename_all = "camelCase")]
    StopTyping { receiver_id: String },

    #[serde(rename = "groupTyping", rename_all = "camelCase")]
    GroupTyping { group_id: String, user_name: String },

    #[serde(rename = "groupStopTyping", rename_all = "camelCase")]
    GroupStopTyping { group_id: String },

    #[serde(rename = "call-user", rename_all = "camelCase")]
    CallUser {
        to: String,
        offer: Value,
        call_type: String,
    },

    #[serde(rename = "call-accepted", rename_all = "camelCase")]
    CallAccepted { to: String, answer: Value },

    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate { to: String, candidate: Value },

    #[serde(rename = "end-call", rename_all = "camelCase")]
    EndCall { to: String },

    #[serde(rename = "call-rejected", rename_all = "camelCase")]
    CallRejected { to: String },
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Full online-user set, broadcast on every presence change.
    #[serde(rename = "getOnlineUsers", rename_all = "camelCase")]
    GetOnlineUsers { user_ids: Vec<String> },

    #[serde(rename = "userTyping", rename_all = "camelCase")]
    UserTyping { user_id: String },

    #[serde(rename = "userStopTyping", rename_all = "camelCase")]
    UserStopTyping { user_id: String },

    #[serde(rename = "groupUserTyping", rename_all = "camelCase")]
    GroupUserTyping {
        group_id: String,
        user_id: String,
        user_name: String,
    },

    #[serde(rename = "groupUserStopTyping", rename_all = "camelCase")]
    GroupUserStopTyping { group_id: String, user_id: String },

    #[serde(rename = "incoming-call", rename_all = "camelCase")]
    IncomingCall {
        from: String,
        caller_name: String,
        caller_pic: Option<String>,
        offer: Value,
        call_type: String,
    },

    #[serde(rename = "call-failed", rename_all = "camelCase")]
    CallFailed { reason: String },

    #[serde(rename = "call-answered", rename_all = "camelCase")]
    CallAnswered { answer: Value },

    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate { from: String, candidate: Value },

    #[serde(rename = "call-ended", rename_all = "camelCase")]
    CallEnded { from: String },

    #[serde(rename = "call-rejected", rename_all = "camelCase")]
    CallRejected { by: String },

    #[serde(rename = "newMessage", rename_all = "camelCase")]
    NewMessage { message: MessagePayload },

    #[serde(rename = "messagesDelivered", rename_all = "camelCase")]
    MessagesDelivered {
        receiver_id: String,
        timestamp: String,
    },

    #[serde(rename = "messagesRead", rename_all = "camelCase")]
    MessagesRead {
        receiver_id: String,
        timestamp: String,
    },

    #[serde(rename = "newGroupMessage", rename_all = "camelCase")]
    NewGroupMessage {
        group_id: String,
        message: MessagePayload,
    },

    #[serde(rename = "messageEdited", rename_all = "camelCase")]
    MessageEdited { message: MessagePayload },

    #[serde(rename = "messageReaction", rename_all = "camelCase")]
    MessageReaction {
        message_id: String,
        user_id: String,
        emoji: String,
        removed: bool,
    },

    #[serde(rename = "messagePinned", rename_all = "camelCase")]
    MessagePinned { message_id: String, pinned: bool },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Wire shape of a message record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    pub is_group_message: bool,
    pub content: String,
    pub status: String,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub expires_at: Option<String>,
    pub scheduled_at: Option<String>,
    pub is_scheduled: bool,
    pub edited: bool,
    pub pinned: bool,
    pub created_at: String,
}

impl From<models::Message> for MessagePayload {
    fn from(m: models::Message) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            group_id: m.group_id,
            is_group_message: m.is_group,
            content: m.content,
            status: m.status,
            delivered_at: m.delivered_at,
            read_at: m.read_at,
            expires_at: m.expires_at,
            scheduled_at: m.scheduled_at,
            is_scheduled: m.is_scheduled,
            edited: m.edited,
            pinned: m.pinned,
            created_at: m.created_at,
        }
    }
}

/// Encode a server event as a WebSocket text frame.
/// Returns None only if serialization fails, which is logged and dropped —
/// a single bad event must not take down the connection.
pub fn encode_event(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            None
        }
    }
}

/// Send a single server event to one connection handle.
pub fn send_event(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    if let Some(msg) = encode_event(event) {
        let _ = tx.send(msg);
    }
}

/// Handle an incoming text frame: decode the client event and dispatch.
pub async fn handle_text_message(
    text: &str,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    user_id: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to decode client event"
            );
            send_event(
                tx,
                &ServerEvent::Error {
                    message: "Invalid event".to_string(),
                },
            );
            return;
        }
    };

    dispatch_event(event, tx, state, user_id).await;
}

/// Dispatch a decoded client event to the appropriate handler.
async fn dispatch_event(
    event: ClientEvent,
    tx: &mpsc::UnboundedSender<Message>,
    state: &AppState,
    user_id: &str,
) {
    match event {
        ClientEvent::Typing { receiver_id } => {
            typing::notify_typing(state, user_id, &receiver_id);
        }
        ClientEvent::StopTyping { receiver_id } => {
            typing::notify_stop_typing(state, user_id, &receiver_id);
        }
        ClientEvent::GroupTyping {
            group_id,
            user_name,
        } => {
            typing::notify_group_typing(state, user_id, &group_id, &user_name);
        }
        ClientEvent::GroupStopTyping { group_id } => {
            typing::notify_group_stop_typing(state, user_id, &group_id);
        }
        ClientEvent::CallUser {
            to,
            offer,
            call_type,
        } => {
            calls::initiate_call(state, user_id, &to, offer, &call_type, tx).await;
        }
        ClientEvent::CallAccepted { to, answer } => {
            calls::accept_call(state, &to, answer);
        }
        ClientEvent::IceCandidate { to, candidate } => {
            calls::relay_ice_candidate(state, user_id, &to, candidate);
        }
        ClientEvent::EndCall { to } => {
            calls::end_call(state, user_id, &to);
        }
        ClientEvent::CallRejected { to } => {
            calls::reject_call(state, user_id, &to);
        }
    }
}
