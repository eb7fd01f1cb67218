//! Call signaling relay: a strict point-to-point pipe for
//! offer/answer/ICE-candidate/termination payloads between two users.
//!
//! No session object exists server-side — the relay is stateless per
//! exchange and correctness relies on the two clients' own state machines.
//! Every relay is a silent drop when the counterpart is offline, except the
//! initial offer, which reports failure back to the caller since reaching
//! the callee is the call's entire purpose.

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::broadcast::send_to_user;
use crate::ws::protocol::{send_event, ServerEvent};

/// Relay a call offer to the callee with the caller's display identity
/// attached. If the callee is offline, exactly one `call-failed` signal goes
/// back to the caller and nothing to anyone else.
pub async fn initiate_call(
    state: &AppState,
    from_id: &str,
    to_id: &str,
    offer: Value,
    call_type: &str,
    tx: &mpsc::UnboundedSender<Message>,
) {
    if !state.connections.is_online(to_id) {
        send_event(
            tx,
            &ServerEvent::CallFailed {
                reason: "callee offline".to_string(),
            },
        );
        return;
    }

    // Resolve the caller's display identity for the callee's incoming-call UI
    let db = state.db.clone();
    let uid = from_id.to_string();
    let caller = tokio::task::spawn_blocking(move || {
        let conn = db.lock().ok()?;
        conn.query_row(
            "SELECT display_name, avatar_url FROM users WHERE id = ?1",
            rusqlite::params![uid],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                ))
            },
        )
        .ok()
    })
    .await
    .ok()
    .flatten();

    let (caller_name, caller_pic) = match caller {
        Some(info) => info,
        None => {
            send_event(
                tx,
                &ServerEvent::CallFailed {
                    reason: "caller unknown".to_string(),
                },
            );
            return;
        }
    };

    send_to_user(
        &state.connections,
        to_id,
        &ServerEvent::IncomingCall {
            from: from_id.to_string(),
            caller_name,
            caller_pic,
            offer,
            call_type: call_type.to_string(),
        },
    );
}

/// Relay the callee's answer back to the caller. Silent drop if offline.
pub fn accept_call(state: &AppState, to_id: &str, answer: Value) {
    send_to_user(
        &state.connections,
        to_id,
        &ServerEvent::CallAnswered { answer },
    );
}

/// Relay an ICE candidate to the counterpart. Silent drop if offline.
pub fn relay_ice_candidate(state: &AppState, from_id: &str, to_id: &str, candidate: Value) {
    send_to_user(
        &state.connections,
        to_id,
        &ServerEvent::IceCandidate {
            from: from_id.to_string(),
            candidate,
        },
    );
}

/// Relay a hang-up to the counterpart. Silent drop if offline; a party
/// receiving an end for a call it does not believe is active handles it
/// idempotently client-side.
pub fn end_call(state: &AppState, from_id: &str, to_id: &str) {
    send_to_user(
        &state.connections,
        to_id,
        &ServerEvent::CallEnded {
            from: from_id.to_string(),
        },
    );
}

/// Relay a rejection to the counterpart. Silent drop if offline.
pub fn reject_call(state: &AppState, from_id: &str, to_id: &str) {
    send_to_user(
        &state.connections,
        to_id,
        &ServerEvent::CallRejected {
            by: from_id.to_string(),
        },
    );
}
