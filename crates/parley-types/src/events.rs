use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A chat message exactly as the client sent it.
///
/// The relay never reshapes this object: it is fanned out to the room
/// byte-for-byte (key order included), and the accessors below only read
/// from it. A field that is absent, empty or not a string reads as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageData(Map<String, Value>);

impl MessageData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and tools.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn room(&self) -> Option<&str> {
        self.str_field("room")
    }

    pub fn user_id(&self) -> Option<&str> {
        self.str_field("userId")
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.str_field("participantId")
    }

    pub fn text(&self) -> Option<&str> {
        self.str_field("text")
    }

    /// Raw `time` value; null counts as absent.
    pub fn time(&self) -> Option<&Value> {
        self.0.get("time").filter(|v| !v.is_null())
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl From<Map<String, Value>> for MessageData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Events sent FROM server TO client over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Sent once after the socket is accepted
    Ready {
        #[serde(rename = "connectionId")]
        connection_id: Uuid,
    },

    /// A message relayed to every member of its room, sender included
    Message(MessageData),
}

/// Commands sent FROM client TO server over the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Join a room by name. There is no leave; membership ends on disconnect.
    JoinRoom(String),

    /// Send a message to `data.room`
    Message(MessageData),
}
