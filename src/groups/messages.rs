//! Group message endpoint. Group messages carry no single delivery status
//! (per-recipient read receipts are not modeled); on success the message is
//! fanned out to the member set, registry-filtered.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::chat::schedule;
use crate::db::models;
use crate::state::AppState;
use crate::ws::broadcast::deliver;
use crate::ws::protocol::{MessagePayload, ServerEvent};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendGroupMessageRequest {
    pub content: String,
    pub disappear_after_minutes: Option<i64>,
}

/// POST /api/groups/{id}/messages — Create a group message and fan out
/// `newGroupMessage` to every member with a live connection.
pub async fn send_group_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(group_id): Path<String>,
    Json(body): Json<SendGroupMessageRequest>,
) -> Result<(StatusCode, Json<MessagePayload>), StatusCode> {
    if body.content.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let now = Utc::now();
    let message = models::Message {
        id: Uuid::now_v7().to_string(),
        sender_id: claims.sub.clone(),
        receiver_id: None,
        group_id: Some(group_id.clone()),
        is_group: true,
        content: body.content.clone(),
        status: models::MessageStatus::Sent.as_str().to_string(),
        delivered_at: None,
        read_at: None,
        expires_at: schedule::compute_expiry(body.disappear_after_minutes, now)
            .map(|t| t.to_rfc3339()),
        scheduled_at: None,
        is_scheduled: false,
        edited: false,
        pinned: false,
        created_at: now.to_rfc3339(),
    };

    let db = state.db.clone();
    let me = claims.sub.clone();
    let gid = group_id.clone();
    let row = message.clone();

    let members = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        // Sender must be a member of the group
        let members =
            crate::groups::member_ids(&conn, &gid).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        if members.is_empty() {
            return Err(StatusCode::NOT_FOUND);
        }
        if !members.contains(&me) {
            return Err(StatusCode::FORBIDDEN);
        }

        conn.execute(
            "INSERT INTO messages (id, sender_id, group_id, is_group, content, status,
                                   expires_at, created_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                row.id,
                row.sender_id,
                row.group_id,
                row.content,
                row.status,
                row.expires_at,
                row.created_at,
            ],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>(members)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let payload = MessagePayload::from(message);
    deliver(
        &state.connections,
        &members,
        &ServerEvent::NewGroupMessage {
            group_id,
            message: payload.clone(),
        },
    );

    Ok((StatusCode::CREATED, Json(payload)))
}
