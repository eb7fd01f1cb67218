//! Registration and login endpoints for the identity collaborator.
//!
//! Resolves a trusted user id before a live connection may enter the
//! registry. Passwords are stored as SHA-256 digests; full OAuth-grade
//! login is out of scope for this server.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::jwt;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub display_name: String,
    pub password: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: String,
    pub display_name: String,
    pub access_token: String,
}

/// SHA-256 digest of a password for storage comparison.
fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// POST /api/auth/register — Create a user account and return an access token.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), StatusCode> {
    if body.username.is_empty() || body.display_name.is_empty() || body.password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let db = state.db.clone();
    let user_id = Uuid::now_v7().to_string();
    let uid = user_id.clone();
    let username = body.username.clone();
    let display_name = body.display_name.clone();
    let avatar_url = body.avatar_url.clone();
    let password_hash = hash_password(&body.password);

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO users (id, username, display_name, avatar_url, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![uid, username, display_name, avatar_url, password_hash, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

        Ok::<_, StatusCode>(())
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user_id, &body.display_name)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(user_id = %user_id, username = %body.username, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            display_name: body.display_name,
            access_token,
        }),
    ))
}

/// POST /api/auth/login — Verify credentials and return an access token.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, StatusCode> {
    let db = state.db.clone();
    let username = body.username.clone();
    let password_hash = hash_password(&body.password);

    let (user_id, display_name) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let (id, display_name, stored_hash): (String, String, String) = conn
            .query_row(
                "SELECT id, display_name, password_hash FROM users WHERE username = ?1",
                rusqlite::params![username],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        if stored_hash != password_hash {
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok::<_, StatusCode>((id, display_name))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user_id, &display_name)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(AuthResponse {
        user_id,
        display_name,
        access_token,
    }))
}
