//! Presence publisher.
//!
//! Presence is exactly the set of users holding a live connection, derived
//! from the connection registry. On every registry mutation the full current
//! set is broadcast to all connected clients — full-set policy rather than
//! incremental diffs, so the final state converges within one broadcast even
//! under connect/disconnect races.

use crate::ws::broadcast::broadcast_to_all;
use crate::ws::protocol::ServerEvent;
use crate::ws::ConnectionRegistry;

/// Broadcast the current online-user set to every connected client.
/// Called after each register/unregister that changed the registry.
pub fn publish_online_users(registry: &ConnectionRegistry) {
    let user_ids = registry.online_users();
    broadcast_to_all(registry, &ServerEvent::GetOnlineUsers { user_ids });
}
