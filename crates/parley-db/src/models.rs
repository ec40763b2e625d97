use chrono::{DateTime, Utc};
use tracing::warn;

use parley_types::models::TranscriptEntry;

/// Database row types. These map directly to SQLite rows and stay
/// independent of the parley-types wire models.

pub struct EntryRow {
    pub sender: String,
    pub receiver: String,
    pub text: String,
    pub time: String,
}

impl EntryRow {
    pub fn into_entry(self) -> TranscriptEntry {
        let time = DateTime::parse_from_rfc3339(&self.time)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                warn!("Corrupt entry time '{}': {}", self.time, e);
                DateTime::default()
            });

        TranscriptEntry {
            sender: self.sender,
            receiver: self.receiver,
            text: self.text,
            time,
        }
    }
}

/// One row of the users ⟕ participants ⟕ entries join. The optional parts are
/// NULL for users without relationships and relationships without entries.
pub struct TranscriptRow {
    pub user_id: String,
    pub participant_id: Option<String>,
    pub entry: Option<EntryRow>,
}
