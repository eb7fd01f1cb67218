//! Delivery state machine: sent -> delivered -> read.
//!
//! Transitions are batch UPDATEs keyed by (sender, receiver) pairs against
//! the storage layer; each statement is atomic and forward-only, so a
//! duplicate or late transition matches no rows and is an idempotent no-op.
//! After a confirmed storage success that changed at least one row, the
//! fan-out notifies the original sender — the party who needs to see the
//! tick-mark update — never the receiver, who initiated the transition.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::state::AppState;
use crate::ws::broadcast::send_to_user;
use crate::ws::protocol::ServerEvent;

/// Advance every direct message from `sender_id` to `receiver_id` still in
/// `sent` to `delivered`, stamping `delivered_at`. Returns rows changed.
pub fn mark_delivered(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
    now: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE messages
         SET status = 'delivered', delivered_at = ?3
         WHERE sender_id = ?1 AND receiver_id = ?2 AND is_group = 0
           AND status = 'sent'",
        rusqlite::params![sender_id, receiver_id, now],
    )
}

/// Advance every direct message from `sender_id` to `receiver_id` in
/// `sent` or `delivered` to `read`, stamping `read_at`. Skip-ahead from
/// `sent` also stamps `delivered_at` so delivered_at <= read_at always
/// holds and no message is left behind in `delivered`. Messages already
/// `read` are untouched. Returns rows changed.
pub fn mark_read(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
    now: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE messages
         SET status = 'read', read_at = ?3,
             delivered_at = COALESCE(delivered_at, ?3)
         WHERE sender_id = ?1 AND receiver_id = ?2 AND is_group = 0
           AND status IN ('sent', 'delivered')",
        rusqlite::params![sender_id, receiver_id, now],
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    /// The counterpart whose messages the caller has received/read.
    pub sender_id: String,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub updated: usize,
}

/// POST /api/messages/delivered — The caller acknowledges delivery of all
/// pending messages from `senderId`. On success the sender is notified with
/// `messagesDelivered`; an empty matching set is a no-op, not an error, and
/// fires no notification.
pub async fn messages_delivered(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, StatusCode> {
    let now = Utc::now().to_rfc3339();
    let updated = run_transition(&state, &body.sender_id, &claims.sub, now.clone(), false).await?;

    if updated > 0 {
        send_to_user(
            &state.connections,
            &body.sender_id,
            &ServerEvent::MessagesDelivered {
                receiver_id: claims.sub,
                timestamp: now,
            },
        );
    }

    Ok(Json(TransitionResponse { updated }))
}

/// POST /api/messages/read — The caller marks all messages from `senderId`
/// as read. Messages still in `sent` skip ahead without passing through
/// `delivered`. Notification mirrors `messages_delivered`.
pub async fn messages_read(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, StatusCode> {
    let now = Utc::now().to_rfc3339();
    let updated = run_transition(&state, &body.sender_id, &claims.sub, now.clone(), true).await?;

    if updated > 0 {
        send_to_user(
            &state.connections,
            &body.sender_id,
            &ServerEvent::MessagesRead {
                receiver_id: claims.sub,
                timestamp: now,
            },
        );
    }

    Ok(Json(TransitionResponse { updated }))
}

/// Run one batch transition on the blocking pool. Storage failure surfaces
/// to the REST caller; the notification only follows a confirmed success.
async fn run_transition(
    state: &AppState,
    sender_id: &str,
    receiver_id: &str,
    now: String,
    to_read: bool,
) -> Result<usize, StatusCode> {
    let db = state.db.clone();
    let sender = sender_id.to_string();
    let receiver = receiver_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let updated = if to_read {
            mark_read(&conn, &sender, &receiver, &now)
        } else {
            mark_delivered(&conn, &sender, &receiver, &now)
        }
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok::<_, StatusCode>(updated)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
}
