//! Room hub: connection registry and broadcast-group membership.
//!
//! Every live WebSocket connection registers an outbound channel here under
//! a [`ConnId`] and joins rooms to receive targeted emits. Emits are fire
//! and forget: a connection whose channel is gone is dropped from the
//! registry at the next emit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

use parley_shared::wire::ServerEvent;
use parley_shared::RoomId;

/// Opaque handle for one live connection. A user who reconnects gets a
/// fresh handle; the presence registry always points at the newest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
struct HubInner {
    conns: HashMap<ConnId, UnboundedSender<ServerEvent>>,
    rooms: HashMap<RoomId, HashSet<ConnId>>,
}

/// Shared connection/room registry.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HubInner>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound channel.
    pub async fn register(&self, conn: ConnId, sender: UnboundedSender<ServerEvent>) {
        let mut inner = self.inner.lock().await;
        inner.conns.insert(conn, sender);
    }

    /// Remove a connection and its room memberships.
    pub async fn unregister(&self, conn: ConnId) {
        let mut inner = self.inner.lock().await;
        inner.conns.remove(&conn);
        inner.rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    pub async fn join(&self, conn: ConnId, room: RoomId) {
        let mut inner = self.inner.lock().await;
        inner.rooms.entry(room).or_default().insert(conn);
    }

    pub async fn leave(&self, conn: ConnId, room: &RoomId) {
        let mut inner = self.inner.lock().await;
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    /// Emit an event to every member of a room.
    pub async fn emit_to_room(&self, room: &RoomId, event: ServerEvent) {
        let mut inner = self.inner.lock().await;
        let Some(members) = inner.rooms.get(room) else {
            trace!(room = %room, "emit to empty room");
            return;
        };

        let targets: Vec<ConnId> = members.iter().copied().collect();
        for conn in targets {
            send_or_evict(&mut inner.conns, conn, event.clone());
        }
    }

    /// Emit an event directly to one connection. Returns `false` if the
    /// connection is no longer registered.
    pub async fn emit_to_conn(&self, conn: ConnId, event: ServerEvent) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.conns.contains_key(&conn) {
            return false;
        }
        send_or_evict(&mut inner.conns, conn, event)
    }

    /// Emit an event to every registered connection.
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let mut inner = self.inner.lock().await;
        let targets: Vec<ConnId> = inner.conns.keys().copied().collect();
        for conn in targets {
            send_or_evict(&mut inner.conns, conn, event.clone());
        }
    }

    /// Members currently in a room (snapshot).
    pub async fn room_members(&self, room: &RoomId) -> Vec<ConnId> {
        let inner = self.inner.lock().await;
        inner
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn send_or_evict(
    conns: &mut HashMap<ConnId, UnboundedSender<ServerEvent>>,
    conn: ConnId,
    event: ServerEvent,
) -> bool {
    match conns.get(&conn) {
        Some(sender) => {
            if sender.send(event).is_err() {
                // Receiver side hung up; forget the connection.
                conns.remove(&conn);
                false
            } else {
                true
            }
        }
        None => false,
    }
}
