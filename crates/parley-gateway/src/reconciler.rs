use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use parley_db::TranscriptStore;
use parley_types::events::MessageData;
use parley_types::models::TranscriptEntry;

use crate::error::RelayError;

/// Create and append can each lose a race to the other writer once; a third
/// flip means the store is misbehaving.
pub const MAX_RECONCILE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Appended,
}

/// The validated persistence half of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptRequest {
    pub user_id: String,
    pub participant_id: String,
    pub text: String,
    pub time: Option<DateTime<Utc>>,
}

impl TranscriptRequest {
    /// Persistence needs room, userId, participantId and text as non-empty
    /// strings. `time`, when present, must be an RFC 3339 string.
    pub fn from_message(msg: &MessageData) -> Result<Self, RelayError> {
        msg.room().ok_or(RelayError::InvalidMessage("room"))?;
        let user_id = msg.user_id().ok_or(RelayError::InvalidMessage("userId"))?;
        let participant_id = msg
            .participant_id()
            .ok_or(RelayError::InvalidMessage("participantId"))?;
        let text = msg.text().ok_or(RelayError::InvalidMessage("text"))?;

        Ok(Self {
            user_id: user_id.to_string(),
            participant_id: participant_id.to_string(),
            text: text.to_string(),
            time: parse_time(msg.time())?,
        })
    }

    fn entry(&self) -> TranscriptEntry {
        TranscriptEntry::new(&self.user_id, &self.participant_id, &self.text, self.time)
    }
}

fn parse_time(raw: Option<&Value>) -> Result<Option<DateTime<Utc>>, RelayError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    raw.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| Some(t.with_timezone(&Utc)))
        .ok_or(RelayError::InvalidMessage("time"))
}

/// Folds messages into per-(user, participant) transcripts.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn TranscriptStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TranscriptStore>) -> Self {
        Self { store }
    }

    pub async fn record_message(&self, msg: &MessageData) -> Result<RecordOutcome, RelayError> {
        let request = TranscriptRequest::from_message(msg)?;
        self.record(request).await
    }

    /// Store calls are blocking, so the whole reconcile runs off the async runtime.
    pub async fn record(&self, request: TranscriptRequest) -> Result<RecordOutcome, RelayError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || reconcile(store.as_ref(), &request))
            .await
            .map_err(|e| {
                RelayError::PersistenceFailure(anyhow::anyhow!("spawn_blocking join error: {}", e))
            })?
    }
}

fn reconcile(
    store: &dyn TranscriptStore,
    request: &TranscriptRequest,
) -> Result<RecordOutcome, RelayError> {
    let user_id = request.user_id.as_str();
    let participant_id = request.participant_id.as_str();
    let entry = request.entry();

    let mut exists = store
        .find_relationship(user_id, participant_id)
        .map_err(RelayError::PersistenceFailure)?
        .is_some();

    for _ in 0..MAX_RECONCILE_ATTEMPTS {
        if exists {
            if store
                .append_entry(user_id, participant_id, &entry)
                .map_err(RelayError::PersistenceFailure)?
            {
                return Ok(RecordOutcome::Appended);
            }
            debug!("{} -> {}: relationship missing on append, creating", user_id, participant_id);
            exists = false;
        } else {
            if store
                .create_relationship(user_id, participant_id, &entry)
                .map_err(RelayError::PersistenceFailure)?
            {
                return Ok(RecordOutcome::Created);
            }
            debug!("{} -> {}: lost creation race, appending", user_id, participant_id);
            exists = true;
        }
    }

    Err(RelayError::PersistenceFailure(anyhow::anyhow!(
        "{} -> {}: gave up after {} attempts",
        user_id,
        participant_id,
        MAX_RECONCILE_ATTEMPTS
    )))
}
