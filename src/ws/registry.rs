//! Connection registry: the single source of truth for "is this user
//! reachable now". One active handle per user; a new connection for the
//! same identity replaces the prior mapping (last-writer-wins).

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;

use crate::ws::ConnectionSender;

/// Close code sent to a connection displaced by a newer session.
const CLOSE_SESSION_REPLACED: u16 = 4000;

/// Tracks the active WebSocket connection per user.
/// Every other component only reads it through `lookup`; all mutation is
/// keyed by a single user id, so no cross-key coordination is ever needed.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<String, ConnectionSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user, replacing any prior handle.
    /// The displaced connection (if any) is told to close; its own actor
    /// cleanup will no longer match in the registry and cannot evict us.
    pub fn register(&self, user_id: &str, handle: ConnectionSender) {
        if let Some(old) = self.inner.insert(user_id.to_string(), handle) {
            let _ = old.send(Message::Close(Some(CloseFrame {
                code: CLOSE_SESSION_REPLACED,
                reason: "Session replaced by a newer connection".into(),
            })));
            tracing::debug!(user_id = %user_id, "Connection replaced");
        } else {
            tracing::debug!(user_id = %user_id, "Connection registered");
        }
    }

    /// Remove the mapping only if the stored handle is the caller's handle.
    /// A stale disconnect must never evict a newer connection for the same
    /// user. Returns whether a removal actually happened.
    pub fn unregister(&self, user_id: &str, handle: &ConnectionSender) -> bool {
        let removed = self
            .inner
            .remove_if(user_id, |_, stored| stored.same_channel(handle))
            .is_some();
        if removed {
            tracing::debug!(user_id = %user_id, "Connection unregistered");
        }
        removed
    }

    /// Current handle for a user, if connected.
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionSender> {
        self.inner.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.contains_key(user_id)
    }

    /// Snapshot of all currently connected user ids.
    pub fn online_users(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }
}
