//! Presence registry.
//!
//! Maps each user to their most recently connected handle. Removal is
//! deferred through a grace period: a transport drop schedules an offline
//! check, and a reconnection within the window supersedes the stale handle
//! so the check becomes a no-op. Observers never see the user flap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use parley_shared::wire::ServerEvent;
use parley_shared::UserId;

use crate::rooms::{ConnId, Hub};

/// Tracks which users are online and through which connection.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<HashMap<UserId, ConnId>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or overwrite) the handle for a user and return the new
    /// online set for broadcasting. A fresh handshake always wins: any
    /// previously tracked handle is superseded without being severed.
    pub async fn set_online(&self, user: UserId, conn: ConnId) -> Vec<UserId> {
        let mut inner = self.inner.lock().await;
        inner.insert(user, conn);
        debug!(user = %user, conn = %conn, "user online");
        inner.keys().copied().collect()
    }

    pub async fn is_online(&self, user: UserId) -> bool {
        self.inner.lock().await.contains_key(&user)
    }

    /// The user's current live handle, if any.
    pub async fn handle_of(&self, user: UserId) -> Option<ConnId> {
        self.inner.lock().await.get(&user).copied()
    }

    pub async fn online_snapshot(&self) -> Vec<UserId> {
        self.inner.lock().await.keys().copied().collect()
    }

    /// Remove the user's entry only if `conn` is still the current handle.
    /// Returns the updated online set when something was removed, `None`
    /// when a newer handshake superseded the check.
    pub async fn remove_if_current(&self, user: UserId, conn: ConnId) -> Option<Vec<UserId>> {
        let mut inner = self.inner.lock().await;
        match inner.get(&user) {
            Some(current) if *current == conn => {
                inner.remove(&user);
                debug!(user = %user, "user offline");
                Some(inner.keys().copied().collect())
            }
            _ => None,
        }
    }

    /// After `delay`, drop the user's presence unless a reconnection
    /// superseded `conn` in the meantime, and re-broadcast the online set.
    /// Spawned per disconnect, keyed by (user, conn).
    pub fn schedule_offline_check(&self, user: UserId, conn: ConnId, delay: Duration, hub: Hub) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(online) = registry.remove_if_current(user, conn).await {
                hub.broadcast_all(ServerEvent::OnlineUsers(online)).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_set_online_includes_user_in_snapshot() {
        let presence = PresenceRegistry::new();
        let user = UserId::new();

        let online = presence.set_online(user, ConnId::new()).await;

        assert!(online.contains(&user));
        assert!(presence.is_online(user).await);
    }

    #[tokio::test]
    async fn test_new_handshake_supersedes_old_handle() {
        let presence = PresenceRegistry::new();
        let user = UserId::new();
        let old = ConnId::new();
        let new = ConnId::new();

        presence.set_online(user, old).await;
        presence.set_online(user, new).await;

        assert_eq!(presence.handle_of(user).await, Some(new));
        // The stale check finds itself superseded and removes nothing.
        assert!(presence.remove_if_current(user, old).await.is_none());
        assert!(presence.is_online(user).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_period_expiry_drops_presence() {
        let presence = PresenceRegistry::new();
        let hub = Hub::new();
        let user = UserId::new();
        let conn = ConnId::new();

        // An observer connection to receive the offline broadcast.
        let observer = ConnId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(observer, tx).await;

        presence.set_online(user, conn).await;
        presence.schedule_offline_check(user, conn, Duration::from_secs(5), hub.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(!presence.is_online(user).await);
        match rx.try_recv() {
            Ok(ServerEvent::OnlineUsers(online)) => assert!(!online.contains(&user)),
            other => panic!("expected OnlineUsers broadcast, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_keeps_user_online() {
        let presence = PresenceRegistry::new();
        let hub = Hub::new();
        let user = UserId::new();
        let first = ConnId::new();

        let observer = ConnId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(observer, tx).await;

        presence.set_online(user, first).await;
        presence.schedule_offline_check(user, first, Duration::from_secs(5), hub.clone());

        // Reconnect 2s into the 5s grace period.
        tokio::time::sleep(Duration::from_secs(2)).await;
        presence.set_online(user, ConnId::new()).await;

        tokio::time::sleep(Duration::from_secs(10)).await;

        // Continuously online; no removal broadcast ever fired.
        assert!(presence.is_online(user).await);
        assert!(rx.try_recv().is_err());
    }
}
