//! Group create/list endpoints. The real-time subsystem treats membership
//! as read-only input for fan-out recipient resolution.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResponse {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub member_ids: Vec<String>,
    pub created_at: String,
}

/// POST /api/groups — Create a group; the creator is always a member.
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupResponse>), StatusCode> {
    if body.name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let owner_id = claims.sub.clone();
    let group_id = Uuid::now_v7().to_string();
    let gid = group_id.clone();
    let name = body.name.clone();
    let mut member_ids = body.member_ids.clone();
    if !member_ids.contains(&owner_id) {
        member_ids.push(owner_id.clone());
    }
    let members = member_ids.clone();
    let owner = owner_id.clone();

    let created_at = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO groups (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![gid, name, owner, now],
        )
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        for user_id in &members {
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![gid, user_id, now],
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        }

        Ok::<_, StatusCode>(now)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((
        StatusCode::CREATED,
        Json(GroupResponse {
            id: group_id,
            name: body.name,
            owner_id,
            member_ids,
            created_at,
        }),
    ))
}

/// GET /api/groups — List groups the caller belongs to.
pub async fn list_groups(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<GroupResponse>>, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.clone();

    let groups = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let mut stmt = conn
            .prepare(
                "SELECT g.id, g.name, g.owner_id, g.created_at
                 FROM groups g
                 JOIN group_members gm ON gm.group_id = g.id
                 WHERE gm.user_id = ?1
                 ORDER BY g.created_at",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let rows: Vec<(String, String, String, String)> = stmt
            .query_map([&me], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        let mut groups = Vec::with_capacity(rows.len());
        for (id, name, owner_id, created_at) in rows {
            let member_ids = crate::groups::member_ids(&conn, &id)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            groups.push(GroupResponse {
                id,
                name,
                owner_id,
                member_ids,
                created_at,
            });
        }

        Ok::<_, StatusCode>(groups)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(groups))
}
