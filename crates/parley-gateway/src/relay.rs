use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use parley_db::TranscriptStore;
use parley_types::events::{MessageData, ServerEvent};

use crate::error::RelayError;
use crate::reconciler::{RecordOutcome, Reconciler, TranscriptRequest};
use crate::registry::{ConnectionId, ConnectionRegistry, Outbound};
use crate::router::{BroadcastReport, RoomRouter};

/// Events the transport feeds into the relay, one stream per connection.
#[derive(Debug)]
pub enum RelayEvent {
    Connect { outbound: Outbound },
    JoinRoom(String),
    Message(MessageData),
    Disconnect,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Connected { newly_registered: bool },
    Joined { newly_joined: bool },
    Message(MessageDispatch),
    Disconnected { rooms_left: usize },
}

/// Result of relaying one message.
#[derive(Debug)]
pub struct MessageDispatch {
    pub report: BroadcastReport,
    /// Handle to the background persistence task; None when the message
    /// lacked the fields needed for a transcript. Dropping it does not cancel
    /// the write.
    pub persistence: Option<JoinHandle<Result<RecordOutcome, RelayError>>>,
}

/// Registry and router change together under one lock so that a connection is
/// in a room's member set exactly when the room is in the connection's set.
#[derive(Default)]
struct Membership {
    registry: ConnectionRegistry,
    router: RoomRouter,
}

/// Owns all room state and the transcript reconciler. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    membership: RwLock<Membership>,
    reconciler: Reconciler,
}

impl Relay {
    pub fn new(store: Arc<dyn TranscriptStore>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                membership: RwLock::new(Membership::default()),
                reconciler: Reconciler::new(store),
            }),
        }
    }

    /// Single entry point for transport events.
    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        event: RelayEvent,
    ) -> Result<DispatchOutcome, RelayError> {
        match event {
            RelayEvent::Connect { outbound } => Ok(DispatchOutcome::Connected {
                newly_registered: self.connect(connection_id, outbound).await,
            }),
            RelayEvent::JoinRoom(room) => Ok(DispatchOutcome::Joined {
                newly_joined: self.join_room(connection_id, &room).await?,
            }),
            RelayEvent::Message(msg) => Ok(DispatchOutcome::Message(
                self.message(connection_id, msg).await?,
            )),
            RelayEvent::Disconnect => Ok(DispatchOutcome::Disconnected {
                rooms_left: self.disconnect(connection_id).await.unwrap_or(0),
            }),
        }
    }

    pub async fn connect(&self, connection_id: ConnectionId, outbound: Outbound) -> bool {
        let registered = self
            .inner
            .membership
            .write()
            .await
            .registry
            .register(connection_id, outbound);

        if registered {
            info!("Connection {} connected", connection_id);
        } else {
            warn!("Connection {} registered twice, keeping existing state", connection_id);
        }
        registered
    }

    pub async fn join_room(&self, connection_id: ConnectionId, room: &str) -> Result<bool, RelayError> {
        let mut membership = self.inner.membership.write().await;
        let joined = membership.registry.join(connection_id, room)?;
        membership.router.add_member(room, connection_id);
        drop(membership);

        if joined {
            info!("Connection {} joined room '{}'", connection_id, room);
        } else {
            debug!("Connection {} already in room '{}'", connection_id, room);
        }
        Ok(joined)
    }

    /// Broadcast first, then persist in the background. Only `room` gates the
    /// broadcast; persistence additionally needs userId, participantId and text.
    pub async fn message(
        &self,
        connection_id: ConnectionId,
        msg: MessageData,
    ) -> Result<MessageDispatch, RelayError> {
        let room = msg
            .room()
            .ok_or(RelayError::InvalidMessage("room"))?
            .to_string();
        let request = TranscriptRequest::from_message(&msg);

        let report = {
            let membership = self.inner.membership.read().await;
            if !membership.registry.contains(connection_id) {
                return Err(RelayError::UnknownConnection(connection_id));
            }
            let event = Arc::new(ServerEvent::Message(msg));
            membership.router.broadcast(&room, event, &membership.registry)
        };

        debug!(
            "Connection {} -> room '{}': delivered {}, failed {}",
            connection_id, room, report.delivered, report.failed
        );

        let persistence = match request {
            Ok(request) => Some(self.spawn_record(request)),
            Err(e) => {
                warn!("Message in room '{}' not recorded: {}", room, e);
                None
            }
        };

        Ok(MessageDispatch { report, persistence })
    }

    fn spawn_record(&self, request: TranscriptRequest) -> JoinHandle<Result<RecordOutcome, RelayError>> {
        let reconciler = self.inner.reconciler.clone();
        tokio::spawn(async move {
            let user_id = request.user_id.clone();
            let participant_id = request.participant_id.clone();
            let result = reconciler.record(request).await;
            match &result {
                Ok(outcome) => debug!("Transcript {} -> {}: {:?}", user_id, participant_id, outcome),
                Err(e) => error!(
                    user_id = %user_id,
                    participant_id = %participant_id,
                    "Message delivered but not recorded: {}",
                    e
                ),
            }
            result
        })
    }

    /// Drop the connection and evict it from every room. Returns how many rooms
    /// it was in, or None if it was not registered.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Option<usize> {
        let mut membership = self.inner.membership.write().await;
        let rooms = membership.registry.unregister(connection_id)?;
        membership
            .router
            .remove_connection_everywhere(connection_id, &rooms);
        drop(membership);

        info!("Connection {} disconnected ({} rooms)", connection_id, rooms.len());
        Some(rooms.len())
    }

    // -- Read accessors --

    /// Rooms the connection has joined, sorted.
    pub async fn joined_rooms(&self, connection_id: ConnectionId) -> Option<Vec<String>> {
        let membership = self.inner.membership.read().await;
        membership.registry.rooms(connection_id).map(|rooms| {
            let mut rooms: Vec<String> = rooms.iter().cloned().collect();
            rooms.sort();
            rooms
        })
    }

    pub async fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.inner.membership.read().await.router.members(room)
    }

    pub async fn room_count(&self) -> usize {
        self.inner.membership.read().await.router.room_count()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.membership.read().await.registry.len()
    }

    /// True when registry and router agree on every membership.
    pub async fn is_consistent(&self) -> bool {
        let membership = self.inner.membership.read().await;
        let registry_side = membership.registry.iter().all(|(id, rooms)| {
            rooms.iter().all(|room| membership.router.is_member(room, id))
        });
        let router_side = membership.router.iter().all(|(room, members)| {
            !members.is_empty()
                && members.iter().all(|id| {
                    membership
                        .registry
                        .rooms(*id)
                        .is_some_and(|rooms| rooms.contains(room))
                })
        });
        registry_side && router_side
    }
}
