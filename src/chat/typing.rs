//! Typing coordinator: short-lived, non-persisted relays of "user X is
//! typing". The server relays what it receives and never enforces a
//! timeout — stop-typing only ever comes from explicit client action or a
//! client-side timer. A best-effort UX signal, not correctness-bearing.

use crate::state::AppState;
use crate::ws::broadcast::{broadcast_to_all_except, send_to_user};
use crate::ws::protocol::ServerEvent;

/// Relay a typing signal to the single direct-chat target, if present.
pub fn notify_typing(state: &AppState, actor_id: &str, receiver_id: &str) {
    send_to_user(
        &state.connections,
        receiver_id,
        &ServerEvent::UserTyping {
            user_id: actor_id.to_string(),
        },
    );
}

/// Relay a stop-typing signal to the single direct-chat target, if present.
pub fn notify_stop_typing(state: &AppState, actor_id: &str, receiver_id: &str) {
    send_to_user(
        &state.connections,
        receiver_id,
        &ServerEvent::UserStopTyping {
            user_id: actor_id.to_string(),
        },
    );
}

/// Relay a group typing signal to all other connected clients.
/// Not membership-filtered: clients filter by groupId themselves.
pub fn notify_group_typing(state: &AppState, actor_id: &str, group_id: &str, user_name: &str) {
    broadcast_to_all_except(
        &state.connections,
        actor_id,
        &ServerEvent::GroupUserTyping {
            group_id: group_id.to_string(),
            user_id: actor_id.to_string(),
            user_name: user_name.to_string(),
        },
    );
}

/// Relay a group stop-typing signal to all other connected clients.
pub fn notify_group_stop_typing(state: &AppState, actor_id: &str, group_id: &str) {
    broadcast_to_all_except(
        &state.connections,
        actor_id,
        &ServerEvent::GroupUserStopTyping {
            group_id: group_id.to_string(),
            user_id: actor_id.to_string(),
        },
    );
}
