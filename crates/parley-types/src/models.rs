use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of a transcript. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub sender: String,
    pub receiver: String,
    pub text: String,
    pub time: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Missing timestamps fall back to the current time.
    pub fn new(sender: &str, receiver: &str, text: &str, time: Option<DateTime<Utc>>) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            text: text.to_string(),
            time: time.unwrap_or_else(Utc::now),
        }
    }
}

/// A user's conversation with one participant. Entries are in append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRelationship {
    pub participant_id: String,
    pub messages: Vec<TranscriptEntry>,
}

/// Everything stored for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    pub participants: Vec<ParticipantRelationship>,
}
