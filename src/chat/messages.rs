//! REST endpoints for direct messages.
//!
//! Storage-mutating operations live here; on success each one asks the
//! fan-out broadcaster to notify the affected peers through their live
//! connections. Delivery-state transitions are in status.rs.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::chat::schedule;
use crate::db::models;
use crate::groups;
use crate::state::AppState;
use crate::ws::broadcast::deliver;
use crate::ws::protocol::{MessagePayload, ServerEvent};

/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: String,
    pub content: String,
    /// Disappearing-message window; expiry is computed from creation time.
    pub disappear_after_minutes: Option<i64>,
    /// Future instants are persisted but withheld from live fan-out.
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessagePayload>,
    pub has_more: bool,
}

/// Map a full messages row in the canonical column order.
pub fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<models::Message> {
    Ok(models::Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        group_id: row.get(3)?,
        is_group: row.get(4)?,
        content: row.get(5)?,
        status: row.get(6)?,
        delivered_at: row.get(7)?,
        read_at: row.get(8)?,
        expires_at: row.get(9)?,
        scheduled_at: row.get(10)?,
        is_scheduled: row.get(11)?,
        edited: row.get(12)?,
        pinned: row.get(13)?,
        created_at: row.get(14)?,
    })
}

pub const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, group_id, is_group, content, \
     status, delivered_at, read_at, expires_at, scheduled_at, is_scheduled, edited, pinned, \
     created_at";

/// Load one message by id.
pub fn load_message(conn: &Connection, id: &str) -> Result<models::Message, StatusCode> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        [id],
        map_message_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    })
}

/// The set of users who should be notified about a change to a message:
/// both direct-chat parties, or the group member set.
pub fn message_recipients(
    conn: &Connection,
    message: &models::Message,
) -> Result<Vec<String>, StatusCode> {
    if message.is_group {
        let group_id = message
            .group_id
            .as_deref()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
        groups::member_ids(conn, group_id).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    } else {
        let mut recipients = vec![message.sender_id.clone()];
        if let Some(receiver) = &message.receiver_id {
            recipients.push(receiver.clone());
        }
        Ok(recipients)
    }
}

/// POST /api/messages — Create a direct message (status=sent).
/// On success fans out `newMessage` to the receiver and echoes to the
/// sender, unless the message is scheduled for the future, in which case it
/// is persisted and the fan-out step is skipped entirely.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessagePayload>), StatusCode> {
    if body.content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let now = Utc::now();
    let expires_at = schedule::compute_expiry(body.disappear_after_minutes, now)
        .map(|t| t.to_rfc3339());
    let due_now = schedule::is_due_for_live_delivery(body.scheduled_at, now);

    let db = state.db.clone();
    let sender_id = claims.sub.clone();
    let receiver_id = body.receiver_id.clone();
    let message = models::Message {
        id: Uuid::now_v7().to_string(),
        sender_id: sender_id.clone(),
        receiver_id: Some(receiver_id.clone()),
        group_id: None,
        is_group: false,
        content: body.content.clone(),
        status: models::MessageStatus::Sent.as_str().to_string(),
        delivered_at: None,
        read_at: None,
        expires_at,
        scheduled_at: body.scheduled_at.map(|t| t.to_rfc3339()),
        is_scheduled: body.scheduled_at.is_some(),
        edited: false,
        pinned: false,
        created_at: now.to_rfc3339(),
    };
    let row = message.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Receiver must be a known identity
        conn.query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            rusqlite::params![row.receiver_id],
            |_| Ok(()),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, is_group, content, status,
                                   expires_at, scheduled_at, is_scheduled, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                row.id,
                row.sender_id,
                row.receiver_id,
                row.content,
                row.status,
                row.expires_at,
                row.scheduled_at,
                row.is_scheduled,
                row.created_at,
            ],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let payload = MessagePayload::from(message);

    if due_now {
        deliver(
            &state.connections,
            &[receiver_id, sender_id],
            &ServerEvent::NewMessage {
                message: payload.clone(),
            },
        );
    }

    Ok((StatusCode::CREATED, Json(payload)))
}

/// GET /api/messages/{peer_id}?before={created_at}&limit={n}
/// Direct-message history with one peer, newest first. Expired rows are
/// purged opportunistically; scheduled rows not yet due stay visible only
/// to their sender until the due time passes.
pub async fn get_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(peer_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.clone();
    let before = query.before.unwrap_or_else(|| "\u{10FFFF}".to_string());
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let now = Utc::now().to_rfc3339();

    let result = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Reclaim expired disappearing messages on the read path
        conn.execute(
            "DELETE FROM messages WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            rusqlite::params![now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE is_group = 0
                   AND ((sender_id = ?1 AND receiver_id = ?2)
                     OR (sender_id = ?2 AND receiver_id = ?1))
                   AND (scheduled_at IS NULL OR scheduled_at <= ?3 OR sender_id = ?1)
                   AND created_at < ?4
                 ORDER BY created_at DESC
                 LIMIT ?5"
            ))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let messages: Vec<MessagePayload> = stmt
            .query_map(
                rusqlite::params![me, peer_id, now, before, (limit + 1) as i64],
                map_message_row,
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .map(MessagePayload::from)
            .collect();

        let has_more = messages.len() > limit as usize;
        let messages: Vec<MessagePayload> = messages.into_iter().take(limit as usize).collect();

        Ok::<_, StatusCode>(HistoryResponse { messages, has_more })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

/// PUT /api/messages/{id} — Edit own message, then fan out `messageEdited`
/// to the affected parties.
pub async fn edit_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<MessagePayload>, StatusCode> {
    if body.content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let me = claims.sub.clone();
    let msg_id = message_id.clone();
    let content = body.content.clone();

    let (message, recipients) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut message = load_message(&conn, &msg_id)?;
        if message.sender_id != me {
            return Err(StatusCode::FORBIDDEN);
        }

        conn.execute(
            "UPDATE messages SET content = ?2, edited = 1 WHERE id = ?1",
            rusqlite::params![msg_id, content],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        message.content = content;
        message.edited = true;

        let recipients = message_recipients(&conn, &message)?;
        Ok::<_, StatusCode>((message, recipients))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let payload = MessagePayload::from(message);
    deliver(
        &state.connections,
        &recipients,
        &ServerEvent::MessageEdited {
            message: payload.clone(),
        },
    );

    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct ReactionResponse {
    pub removed: bool,
}

/// POST /api/messages/{id}/reactions — Toggle a reaction, then fan out
/// `messageReaction` to the affected parties.
pub async fn react_to_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<ReactionRequest>,
) -> Result<Json<ReactionResponse>, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.clone();
    let msg_id = message_id.clone();
    let emoji = body.emoji.clone();

    let (removed, recipients) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let message = load_message(&conn, &msg_id)?;

        // Only conversation participants may react
        let recipients = message_recipients(&conn, &message)?;
        if !recipients.contains(&me) {
            return Err(StatusCode::FORBIDDEN);
        }

        let deleted = conn
            .execute(
                "DELETE FROM message_reactions
                 WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![msg_id, me, emoji],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let removed = deleted > 0;
        if !removed {
            conn.execute(
                "INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![msg_id, me, emoji, Utc::now().to_rfc3339()],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        Ok::<_, StatusCode>((removed, recipients))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    deliver(
        &state.connections,
        &recipients,
        &ServerEvent::MessageReaction {
            message_id,
            user_id: claims.sub,
            emoji: body.emoji,
            removed,
        },
    );

    Ok(Json(ReactionResponse { removed }))
}

#[derive(Debug, Serialize)]
pub struct PinResponse {
    pub pinned: bool,
}

/// POST /api/messages/{id}/pin — Toggle the pinned flag, then fan out
/// `messagePinned` to the affected parties.
pub async fn pin_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<Json<PinResponse>, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub;
    let msg_id = message_id.clone();

    let (pinned, recipients) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let message = load_message(&conn, &msg_id)?;

        // Only conversation participants may pin
        let recipients = message_recipients(&conn, &message)?;
        if !recipients.contains(&me) {
            return Err(StatusCode::FORBIDDEN);
        }

        let pinned = !message.pinned;

        conn.execute(
            "UPDATE messages SET pinned = ?2 WHERE id = ?1",
            rusqlite::params![msg_id, pinned],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>((pinned, recipients))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    deliver(
        &state.connections,
        &recipients,
        &ServerEvent::MessagePinned {
            message_id,
            pinned,
        },
    );

    Ok(Json(PinResponse { pinned }))
}
