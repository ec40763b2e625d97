use anyhow::Result;

use parley_types::models::{ParticipantRelationship, TranscriptEntry, UserRecord};

use crate::Database;

/// Store primitives the transcript reconciler is written against.
///
/// `append_entry` and `create_relationship` must each be a single atomic
/// operation in the backing store. The boolean tells the caller whether the
/// write happened: append returns false when the relationship is absent,
/// create returns false when it already exists.
pub trait TranscriptStore: Send + Sync {
    fn find_relationship(
        &self,
        user_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantRelationship>>;

    fn append_entry(
        &self,
        user_id: &str,
        participant_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<bool>;

    fn create_relationship(
        &self,
        user_id: &str,
        participant_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<bool>;

    fn list_user_records(&self) -> Result<Vec<UserRecord>>;
}

impl TranscriptStore for Database {
    fn find_relationship(
        &self,
        user_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantRelationship>> {
        Database::find_relationship(self, user_id, participant_id)
    }

    fn append_entry(
        &self,
        user_id: &str,
        participant_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<bool> {
        Database::append_entry(self, user_id, participant_id, entry)
    }

    fn create_relationship(
        &self,
        user_id: &str,
        participant_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<bool> {
        Database::create_relationship(self, user_id, participant_id, entry)
    }

    fn list_user_records(&self) -> Result<Vec<UserRecord>> {
        Database::list_user_records(self)
    }
}
