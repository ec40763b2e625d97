use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::error::RelayError;
use crate::router::DeliverySink;

/// Outbound half of a connection. Unbounded so fan-out never waits on a slow socket.
pub type Outbound = mpsc::UnboundedSender<Arc<ServerEvent>>;

/// Opaque identifier handed out by the transport for each live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct ConnectionEntry {
    rooms: HashSet<String>,
    outbound: Outbound,
}

/// Live connections and the rooms each has joined.
///
/// Not synchronized on its own: the relay keeps it next to the room router
/// under one lock so both sides of the membership change together.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already registered. The existing entry is left untouched.
    pub fn register(&mut self, connection_id: ConnectionId, outbound: Outbound) -> bool {
        if self.connections.contains_key(&connection_id) {
            return false;
        }
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                rooms: HashSet::new(),
                outbound,
            },
        );
        true
    }

    /// Record that `connection_id` joined `room`. Returns false if it was already a member.
    pub fn join(&mut self, connection_id: ConnectionId, room: &str) -> Result<bool, RelayError> {
        if room.is_empty() {
            return Err(RelayError::InvalidMessage("room"));
        }
        let entry = self
            .connections
            .get_mut(&connection_id)
            .ok_or(RelayError::UnknownConnection(connection_id))?;
        Ok(entry.rooms.insert(room.to_string()))
    }

    /// Remove the connection and hand back every room it was in.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<HashSet<String>> {
        self.connections
            .remove(&connection_id)
            .map(|entry| entry.rooms)
    }

    pub fn rooms(&self, connection_id: ConnectionId) -> Option<&HashSet<String>> {
        self.connections.get(&connection_id).map(|entry| &entry.rooms)
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &HashSet<String>)> {
        self.connections.iter().map(|(id, entry)| (*id, &entry.rooms))
    }
}

impl DeliverySink for ConnectionRegistry {
    fn deliver(&self, connection_id: ConnectionId, event: &Arc<ServerEvent>) -> Result<(), RelayError> {
        let entry = self
            .connections
            .get(&connection_id)
            .ok_or(RelayError::DeliveryFailure(connection_id))?;
        entry
            .outbound
            .send(event.clone())
            .map_err(|_| RelayError::DeliveryFailure(connection_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound() -> (Outbound, mpsc::UnboundedReceiver<Arc<ServerEvent>>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = outbound();
        let (tx2, _rx2) = outbound();

        assert!(registry.register(id, tx));
        registry.join(id, "r1").unwrap();
        assert!(!registry.register(id, tx2));

        // Second register must not wipe the joined rooms
        assert!(registry.rooms(id).unwrap().contains("r1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_join_validates() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new();

        assert!(matches!(
            registry.join(id, "r1"),
            Err(RelayError::UnknownConnection(c)) if c == id
        ));

        let (tx, _rx) = outbound();
        registry.register(id, tx);
        assert!(matches!(registry.join(id, ""), Err(RelayError::InvalidMessage("room"))));
        assert!(registry.join(id, "r1").unwrap());
        assert!(!registry.join(id, "r1").unwrap());
    }

    #[test]
    fn test_unregister_returns_rooms_once() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = outbound();
        registry.register(id, tx);
        registry.join(id, "a").unwrap();
        registry.join(id, "b").unwrap();

        let rooms = registry.unregister(id).unwrap();
        assert_eq!(rooms.len(), 2);
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deliver_to_closed_channel_fails() {
        let mut registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, rx) = outbound();
        registry.register(id, tx);
        drop(rx);

        let event = Arc::new(ServerEvent::Ready { connection_id: id.as_uuid() });
        assert!(matches!(
            registry.deliver(id, &event),
            Err(RelayError::DeliveryFailure(_))
        ));
        assert!(matches!(
            registry.deliver(ConnectionId::new(), &event),
            Err(RelayError::DeliveryFailure(_))
        ));
    }
}
