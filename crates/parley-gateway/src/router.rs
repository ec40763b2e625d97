use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use parley_types::events::ServerEvent;

use crate::error::RelayError;
use crate::registry::ConnectionId;

/// Resolves a connection id to its transport and hands it an event.
pub trait DeliverySink {
    fn deliver(&self, connection_id: ConnectionId, event: &Arc<ServerEvent>) -> Result<(), RelayError>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Room name -> member connections. Rooms exist only while they have members.
#[derive(Debug, Default)]
pub struct RoomRouter {
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already a member.
    pub fn add_member(&mut self, room: &str, connection_id: ConnectionId) -> bool {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id)
    }

    /// Removes the member and drops the room once it is empty.
    pub fn remove_member(&mut self, room: &str, connection_id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }

    pub fn remove_connection_everywhere<I, S>(&mut self, connection_id: ConnectionId, rooms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for room in rooms {
            self.remove_member(room.as_ref(), connection_id);
        }
    }

    /// Deliver `event` to every member of `room`, sender included.
    /// A failed member is logged and counted; the rest still get the event.
    pub fn broadcast(
        &self,
        room: &str,
        event: Arc<ServerEvent>,
        sink: &impl DeliverySink,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        let Some(members) = self.rooms.get(room) else {
            debug!("Broadcast to empty room '{}' dropped", room);
            return report;
        };

        for &member in members {
            match sink.deliver(member, &event) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Room '{}': {}", room, e);
                    report.failed += 1;
                }
            }
        }

        report
    }

    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &str, connection_id: ConnectionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&connection_id))
    }

    pub fn contains_room(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HashSet<ConnectionId>)> {
        self.rooms.iter().map(|(room, members)| (room.as_str(), members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use parley_types::events::MessageData;

    /// Records deliveries and fails for a fixed set of connections.
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<ConnectionId>>,
        broken: HashSet<ConnectionId>,
    }

    impl DeliverySink for RecordingSink {
        fn deliver(&self, connection_id: ConnectionId, _event: &Arc<ServerEvent>) -> Result<(), RelayError> {
            if self.broken.contains(&connection_id) {
                return Err(RelayError::DeliveryFailure(connection_id));
            }
            self.delivered.lock().unwrap().push(connection_id);
            Ok(())
        }
    }

    fn event() -> Arc<ServerEvent> {
        Arc::new(ServerEvent::Message(
            MessageData::new().with("room", "r1").with("text", "hi"),
        ))
    }

    #[test]
    fn test_room_created_lazily_and_collected() {
        let mut router = RoomRouter::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        assert!(!router.contains_room("r1"));
        assert!(router.add_member("r1", a));
        assert!(!router.add_member("r1", a));
        router.add_member("r1", b);
        assert_eq!(router.members("r1").len(), 2);

        assert!(router.remove_member("r1", a));
        assert!(router.contains_room("r1"));
        assert!(router.remove_member("r1", b));
        assert!(!router.contains_room("r1"));
        assert_eq!(router.room_count(), 0);

        assert!(!router.remove_member("r1", b));
    }

    #[test]
    fn test_remove_everywhere() {
        let mut router = RoomRouter::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        router.add_member("r1", a);
        router.add_member("r2", a);
        router.add_member("r2", b);

        router.remove_connection_everywhere(a, ["r1", "r2"]);

        assert!(!router.contains_room("r1"));
        assert_eq!(router.members("r2"), vec![b]);
    }

    #[test]
    fn test_broadcast_reaches_all_members() {
        let mut router = RoomRouter::new();
        let sender = ConnectionId::new();
        let other = ConnectionId::new();
        let outsider = ConnectionId::new();
        router.add_member("r1", sender);
        router.add_member("r1", other);
        router.add_member("r2", outsider);

        let sink = RecordingSink::default();
        let report = router.broadcast("r1", event(), &sink);

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
        let delivered = sink.delivered.lock().unwrap();
        assert!(delivered.contains(&sender));
        assert!(delivered.contains(&other));
        assert!(!delivered.contains(&outsider));
    }

    #[test]
    fn test_broadcast_isolates_failures() {
        let mut router = RoomRouter::new();
        let ids: Vec<ConnectionId> = (0..5).map(|_| ConnectionId::new()).collect();
        for id in &ids {
            router.add_member("r1", *id);
        }

        let sink = RecordingSink {
            broken: [ids[1], ids[3]].into_iter().collect(),
            ..Default::default()
        };
        let report = router.broadcast("r1", event(), &sink);

        assert_eq!(report, BroadcastReport { delivered: 3, failed: 2 });
    }

    #[test]
    fn test_broadcast_to_missing_room_is_noop() {
        let router = RoomRouter::new();
        let sink = RecordingSink::default();
        assert_eq!(router.broadcast("nope", event(), &sink), BroadcastReport::default());
    }
}
