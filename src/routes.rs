use axum::{middleware, Router};

use crate::auth::accounts;
use crate::auth::middleware::JwtSecret;
use crate::chat::{messages, status};
use crate::groups::{crud as group_crud, messages as group_messages};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Identity collaborator (no auth required)
    let auth_routes = Router::new()
        .route("/api/auth/register", axum::routing::post(accounts::register))
        .route("/api/auth/login", axum::routing::post(accounts::login));

    // Direct messages (JWT required — Claims extractor validates token).
    // Note: /api/messages/delivered and /read are literal segments and must
    // not be shadowed by the /api/messages/{id} param route.
    let message_routes = Router::new()
        .route("/api/messages", axum::routing::post(messages::send_message))
        .route(
            "/api/messages/delivered",
            axum::routing::post(status::messages_delivered),
        )
        .route(
            "/api/messages/read",
            axum::routing::post(status::messages_read),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::get(messages::get_conversation).put(messages::edit_message),
        )
        .route(
            "/api/messages/{id}/reactions",
            axum::routing::post(messages::react_to_message),
        )
        .route(
            "/api/messages/{id}/pin",
            axum::routing::post(messages::pin_message),
        );

    // Groups
    let group_routes = Router::new()
        .route("/api/groups", axum::routing::post(group_crud::create_group))
        .route("/api/groups", axum::routing::get(group_crud::list_groups))
        .route(
            "/api/groups/{id}/messages",
            axum::routing::post(group_messages::send_group_message),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(message_routes)
        .merge(group_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
