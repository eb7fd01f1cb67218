//! Fan-out broadcaster: deliver one logical event to a computed set of
//! recipients through their live connections. Recipients without a live
//! connection are silently skipped — durability belongs to the storage
//! layer, never to this path.

use std::collections::HashSet;

use crate::ws::protocol::{encode_event, ServerEvent};
use crate::ws::ConnectionRegistry;

/// Deliver an event to every recipient currently present in the registry.
/// The recipient list is treated as a set: duplicate ids (a self-chat puts
/// the same user in as both sender and receiver) collapse to one delivery.
/// The event is serialized once; absent recipients are dropped without
/// error and without queuing. A recipient present at the moment of the
/// call receives exactly one delivery attempt.
pub fn deliver(registry: &ConnectionRegistry, recipients: &[String], event: &ServerEvent) {
    let Some(msg) = encode_event(event) else {
        return;
    };

    let mut seen: HashSet<&str> = HashSet::with_capacity(recipients.len());
    for user_id in recipients {
        if !seen.insert(user_id.as_str()) {
            continue;
        }
        if let Some(sender) = registry.lookup(user_id) {
            let _ = sender.send(msg.clone());
        }
    }
}

/// Send an event to a single user, if connected. Returns whether a
/// delivery attempt was made.
pub fn send_to_user(registry: &ConnectionRegistry, user_id: &str, event: &ServerEvent) -> bool {
    let Some(msg) = encode_event(event) else {
        return false;
    };

    match registry.lookup(user_id) {
        Some(sender) => {
            let _ = sender.send(msg);
            true
        }
        None => false,
    }
}

/// Broadcast an event to all connected clients.
pub fn broadcast_to_all(registry: &ConnectionRegistry, event: &ServerEvent) {
    let Some(msg) = encode_event(event) else {
        return;
    };

    for user_id in registry.online_users() {
        if let Some(sender) = registry.lookup(&user_id) {
            let _ = sender.send(msg.clone());
        }
    }
}

/// Broadcast an event to all connected clients except one user.
pub fn broadcast_to_all_except(
    registry: &ConnectionRegistry,
    excluded_user_id: &str,
    event: &ServerEvent,
) {
    let Some(msg) = encode_event(event) else {
        return;
    };

    for user_id in registry.online_users() {
        if user_id == excluded_user_id {
            continue;
        }
        if let Some(sender) = registry.lookup(&user_id) {
            let _ = sender.send(msg.clone());
        }
    }
}
