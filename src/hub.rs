//! Real-time fan-out hub.
//!
//! Tracks live connections and the rooms they have joined, and delivers
//! events to exactly the connections currently in a room. State is
//! process-local: rooms are created on first join, dropped when their last
//! member leaves, and rebuilt from scratch on restart.

use crate::{
    entity::UserId,
    error::{ChatError, Result},
    interface::protocol::ServerEvent,
    rooms::RoomKey,
};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// One live real-time connection and the identity bound to it at connect time.
pub struct Connection {
    pub id: ConnectionId,
    /// `None` when the connect-time credential was absent or did not resolve.
    pub user: Option<UserId>,
    tx: mpsc::Sender<ServerEvent>,
    rooms: DashSet<RoomKey>,
}

impl Connection {
    pub fn new(user: Option<UserId>, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            tx,
            rooms: DashSet::new(),
        }
    }

    /// A connection paired with the receiving end of its outbound queue.
    pub fn channel(
        user: Option<UserId>,
        buffer: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Arc::new(Self::new(user, tx)), rx)
    }

    pub fn is_bound(&self) -> bool {
        self.user.is_some()
    }

    /// Queue an event for this connection without waiting. Fails if the
    /// queue is full (slow reader) or the socket task has gone away.
    pub fn send(&self, event: ServerEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|_| ChatError::ChannelSend)
    }

    pub fn rooms(&self) -> Vec<RoomKey> {
        self.rooms.iter().map(|r| r.clone()).collect()
    }
}

#[derive(Default)]
pub struct Hub {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    rooms: DashMap<RoomKey, DashSet<ConnectionId>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, conn: Arc<Connection>) -> ConnectionId {
        let id = conn.id;
        self.connections.insert(id, conn);
        debug!("Connection {} registered", id);
        id
    }

    /// Drop the connection and every room membership it holds.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(id) {
            for room in conn.rooms() {
                self.remove_member(&room, id);
            }
            debug!("Connection {} unregistered", id);
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| c.clone())
    }

    /// Add the connection to `room`. Returns `false` if it was already a
    /// member or is not registered.
    pub fn join(&self, id: &ConnectionId, room: &RoomKey) -> bool {
        let Some(conn) = self.get(id) else {
            return false;
        };
        if !conn.rooms.insert(room.clone()) {
            return false;
        }
        self.rooms.entry(room.clone()).or_default().insert(*id);
        info!("Connection {} joined {}", id, room);
        true
    }

    /// Remove the connection from `room`. Returns `false` if it was not a member.
    pub fn leave(&self, id: &ConnectionId, room: &RoomKey) -> bool {
        let Some(conn) = self.get(id) else {
            return false;
        };
        if conn.rooms.remove(room).is_none() {
            return false;
        }
        self.remove_member(room, id);
        info!("Connection {} left {}", id, room);
        true
    }

    fn remove_member(&self, room: &RoomKey, id: &ConnectionId) {
        if let Some(members) = self.rooms.get(room) {
            members.remove(id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Deliver `event` to every connection currently in `room`.
    ///
    /// Best effort: a member whose queue is full or closed misses the event.
    /// Returns the number of connections the event was queued for.
    pub fn broadcast(&self, room: &RoomKey, event: &ServerEvent) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(room) {
            Some(members) => members.iter().map(|id| *id).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for id in members {
            let Some(conn) = self.get(&id) else {
                continue;
            };
            match conn.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Failed to send {} to {}: {}", event.name(), id, e),
            }
        }
        debug!("Broadcast {} to {} ({} delivered)", event.name(), room, delivered);
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entity::OrderId, interface::protocol::ReadReceipt};
    use chrono::Utc;

    fn receipt(user: &str) -> ServerEvent {
        ServerEvent::MessagesRead(ReadReceipt {
            counterparty_id: UserId::new("1"),
            user_id: UserId::new(user),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_join_is_idempotent() {
        let hub = Hub::new();
        let (conn, mut rx) = Connection::channel(None, 8);
        let id = hub.register(conn.clone());
        let room = RoomKey::for_counterparty(&UserId::new("42"));

        assert!(hub.join(&id, &room));
        assert!(!hub.join(&id, &room));
        assert_eq!(conn.rooms(), vec![room.clone()]);

        assert_eq!(hub.broadcast(&room, &receipt("x")), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_is_scoped_to_room() {
        let hub = Hub::new();
        let (a, mut rx_a) = Connection::channel(None, 8);
        let (b, mut rx_b) = Connection::channel(None, 8);
        let a = hub.register(a);
        let b = hub.register(b);
        let r1 = RoomKey::for_counterparty(&UserId::new("42"));
        let r2 = RoomKey::for_counterparty(&UserId::new("99"));
        hub.join(&a, &r1);
        hub.join(&b, &r2);

        assert_eq!(hub.broadcast(&r1, &receipt("x")), 1);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_preserves_order_within_room() {
        let hub = Hub::new();
        let (conn, mut rx) = Connection::channel(None, 8);
        let id = hub.register(conn);
        let room = RoomKey::for_order(&OrderId::new("o1"));
        hub.join(&id, &room);

        for user in ["a", "b", "c"] {
            hub.broadcast(&room, &receipt(user));
        }
        for user in ["a", "b", "c"] {
            match rx.try_recv().unwrap() {
                ServerEvent::MessagesRead(r) => assert_eq!(r.user_id, UserId::new(user)),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_unregister_drops_memberships_and_empty_rooms() {
        let hub = Hub::new();
        let (conn, _rx) = Connection::channel(Some(UserId::new("1")), 8);
        let id = hub.register(conn);
        let r1 = RoomKey::for_counterparty(&UserId::new("1"));
        let r2 = RoomKey::for_order(&OrderId::new("o1"));
        hub.join(&id, &r1);
        hub.join(&id, &r2);
        assert_eq!(hub.room_count(), 2);

        hub.unregister(&id);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.room_count(), 0);
        assert_eq!(hub.broadcast(&r1, &receipt("x")), 0);
    }

    #[test]
    fn test_leave_keeps_room_with_remaining_members() {
        let hub = Hub::new();
        let (a, mut rx_a) = Connection::channel(None, 8);
        let (b, mut rx_b) = Connection::channel(None, 8);
        let a = hub.register(a);
        let b = hub.register(b);
        let room = RoomKey::for_counterparty(&UserId::new("5"));
        hub.join(&a, &room);
        hub.join(&b, &room);

        assert!(hub.leave(&a, &room));
        assert!(!hub.leave(&a, &room));
        assert_eq!(hub.room_count(), 1);
        assert_eq!(hub.broadcast(&room, &receipt("x")), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());

        assert!(hub.leave(&b, &room));
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_full_queue_drops_event() {
        let hub = Hub::new();
        let (conn, _rx) = Connection::channel(None, 1);
        let id = hub.register(conn);
        let room = RoomKey::for_counterparty(&UserId::new("1"));
        hub.join(&id, &room);

        assert_eq!(hub.broadcast(&room, &receipt("a")), 1);
        assert_eq!(hub.broadcast(&room, &receipt("b")), 0);
    }

    #[test]
    fn test_join_unknown_connection_is_ignored() {
        let hub = Hub::new();
        let room = RoomKey::for_counterparty(&UserId::new("1"));
        assert!(!hub.join(&Uuid::new_v4(), &room));
        assert_eq!(hub.room_count(), 0);
    }
}
