use crate::Database;
use crate::models::{EntryRow, TranscriptRow};
use anyhow::Result;
use chrono::SecondsFormat;
use rusqlite::Connection;

use parley_types::models::{ParticipantRelationship, TranscriptEntry, UserRecord};

impl Database {
    // -- Relationships --

    pub fn find_relationship(
        &self,
        user_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantRelationship>> {
        self.with_conn(|conn| query_relationship(conn, user_id, participant_id))
    }

    /// Append to an existing relationship in one statement.
    /// Returns false if the relationship does not exist (nothing written).
    pub fn append_entry(
        &self,
        user_id: &str,
        participant_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO transcript_entries (relationship_id, sender, receiver, text, time)
                 SELECT id, ?3, ?4, ?5, ?6 FROM participants
                 WHERE user_id = ?1 AND participant_id = ?2",
                rusqlite::params![
                    user_id,
                    participant_id,
                    entry.sender,
                    entry.receiver,
                    entry.text,
                    format_time(entry),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Create the relationship (and its user, if new) holding exactly `entry`.
    /// Returns false, writing nothing, if the relationship already exists.
    pub fn create_relationship(
        &self,
        user_id: &str,
        participant_id: &str,
        entry: &TranscriptEntry,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            tx.execute(
                "INSERT INTO users (id) VALUES (?1) ON CONFLICT(id) DO NOTHING",
                [user_id],
            )?;

            let inserted = tx.execute(
                "INSERT INTO participants (user_id, participant_id) VALUES (?1, ?2)
                 ON CONFLICT(user_id, participant_id) DO NOTHING",
                (user_id, participant_id),
            )?;
            if inserted == 0 {
                // Dropping the transaction rolls it back
                return Ok(false);
            }

            let relationship_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO transcript_entries (relationship_id, sender, receiver, text, time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    relationship_id,
                    entry.sender,
                    entry.receiver,
                    entry.text,
                    format_time(entry),
                ],
            )?;

            tx.commit()?;
            Ok(true)
        })
    }

    // -- Users --

    /// Every user with all relationships and entries, in creation order.
    pub fn list_user_records(&self) -> Result<Vec<UserRecord>> {
        self.with_conn(|conn| {
            let rows = query_all_transcripts(conn)?;
            Ok(group_user_records(rows))
        })
    }
}

fn format_time(entry: &TranscriptEntry) -> String {
    entry.time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn query_relationship(
    conn: &Connection,
    user_id: &str,
    participant_id: &str,
) -> Result<Option<ParticipantRelationship>> {
    // Single statement so the existence check and the entries come from one snapshot
    let mut stmt = conn.prepare(
        "SELECT e.sender, e.receiver, e.text, e.time
         FROM participants p
         LEFT JOIN transcript_entries e ON e.relationship_id = p.id
         WHERE p.user_id = ?1 AND p.participant_id = ?2
         ORDER BY e.seq",
    )?;

    let rows = stmt
        .query_map((user_id, participant_id), |row| read_entry(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rows.is_empty() {
        return Ok(None);
    }

    Ok(Some(ParticipantRelationship {
        participant_id: participant_id.to_string(),
        messages: rows.into_iter().flatten().map(EntryRow::into_entry).collect(),
    }))
}

fn query_all_transcripts(conn: &Connection) -> Result<Vec<TranscriptRow>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, p.participant_id, e.sender, e.receiver, e.text, e.time
         FROM users u
         LEFT JOIN participants p ON p.user_id = u.id
         LEFT JOIN transcript_entries e ON e.relationship_id = p.id
         ORDER BY u.rowid, p.id, e.seq",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(TranscriptRow {
                user_id: row.get(0)?,
                participant_id: row.get(1)?,
                entry: read_entry(row, 2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Reads four entry columns starting at `offset`; None when the LEFT JOIN found no entry.
fn read_entry(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Option<EntryRow>> {
    let sender: Option<String> = row.get(offset)?;
    match sender {
        Some(sender) => Ok(Some(EntryRow {
            sender,
            receiver: row.get(offset + 1)?,
            text: row.get(offset + 2)?,
            time: row.get(offset + 3)?,
        })),
        None => Ok(None),
    }
}

/// Fold ordered join rows into nested records. Relies on the ORDER BY above.
fn group_user_records(rows: Vec<TranscriptRow>) -> Vec<UserRecord> {
    let mut records: Vec<UserRecord> = Vec::new();

    for row in rows {
        if records.last().map(|r| r.user_id != row.user_id).unwrap_or(true) {
            records.push(UserRecord {
                user_id: row.user_id.clone(),
                participants: Vec::new(),
            });
        }
        let Some(record) = records.last_mut() else {
            continue;
        };

        let Some(participant_id) = row.participant_id else {
            continue;
        };
        if record
            .participants
            .last()
            .map(|p| p.participant_id != participant_id)
            .unwrap_or(true)
        {
            record.participants.push(ParticipantRelationship {
                participant_id,
                messages: Vec::new(),
            });
        }

        if let (Some(relationship), Some(entry)) = (record.participants.last_mut(), row.entry) {
            relationship.messages.push(entry.into_entry());
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::ops::Deref;
    use std::path::PathBuf;

    /// Database in the system temp directory. The file and its WAL side files
    /// are removed once the connections are closed.
    struct TempDb {
        db: Option<Database>,
        path: PathBuf,
    }

    impl Deref for TempDb {
        type Target = Database;

        fn deref(&self) -> &Database {
            self.db.as_ref().unwrap()
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            self.db.take();
            for suffix in ["", "-wal", "-shm"] {
                let mut file = self.path.clone().into_os_string();
                file.push(suffix);
                let _ = std::fs::remove_file(file);
            }
        }
    }

    fn temp_db() -> TempDb {
        let path = std::env::temp_dir().join(format!("parley_db_test_{}.db", uuid::Uuid::new_v4()));
        let db = Database::open(&path).unwrap();
        TempDb { db: Some(db), path }
    }

    fn entry(text: &str, secs: i64) -> TranscriptEntry {
        TranscriptEntry {
            sender: "u1".into(),
            receiver: "p1".into(),
            text: text.into(),
            time: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_find_missing_relationship() {
        let db = temp_db();
        assert!(db.find_relationship("u1", "p1").unwrap().is_none());
    }

    #[test]
    fn test_create_then_append_keeps_order() {
        let db = temp_db();

        assert!(db.create_relationship("u1", "p1", &entry("hi", 100)).unwrap());
        assert!(db.append_entry("u1", "p1", &entry("how are you", 50)).unwrap());

        let rel = db.find_relationship("u1", "p1").unwrap().unwrap();
        assert_eq!(rel.participant_id, "p1");
        let texts: Vec<&str> = rel.messages.iter().map(|m| m.text.as_str()).collect();
        // Append order, not timestamp order
        assert_eq!(texts, vec!["hi", "how are you"]);
        assert_eq!(rel.messages[0].time, Utc.timestamp_opt(100, 0).unwrap());
    }

    #[test]
    fn test_create_is_noop_when_present() {
        let db = temp_db();

        assert!(db.create_relationship("u1", "p1", &entry("first", 1)).unwrap());
        assert!(!db.create_relationship("u1", "p1", &entry("second", 2)).unwrap());

        let rel = db.find_relationship("u1", "p1").unwrap().unwrap();
        assert_eq!(rel.messages.len(), 1);
        assert_eq!(rel.messages[0].text, "first");
    }

    #[test]
    fn test_append_to_missing_writes_nothing() {
        let db = temp_db();

        assert!(!db.append_entry("u1", "p1", &entry("lost?", 1)).unwrap());
        assert!(db.find_relationship("u1", "p1").unwrap().is_none());
        assert!(db.list_user_records().unwrap().is_empty());
    }

    #[test]
    fn test_list_groups_by_user_and_participant() {
        let db = temp_db();

        db.create_relationship("u1", "p1", &entry("a", 1)).unwrap();
        db.create_relationship("u1", "p2", &entry("b", 2)).unwrap();
        db.append_entry("u1", "p1", &entry("c", 3)).unwrap();
        db.create_relationship("u2", "p1", &entry("d", 4)).unwrap();

        let records = db.list_user_records().unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].user_id, "u1");
        assert_eq!(records[0].participants.len(), 2);
        assert_eq!(records[0].participants[0].participant_id, "p1");
        assert_eq!(records[0].participants[0].messages.len(), 2);
        assert_eq!(records[0].participants[1].participant_id, "p2");

        assert_eq!(records[1].user_id, "u2");
        assert_eq!(records[1].participants[0].messages[0].text, "d");
    }

    #[test]
    fn test_temp_files_removed_on_drop() {
        let db = temp_db();
        db.create_relationship("u1", "p1", &entry("hi", 1)).unwrap();
        let path = db.path.clone();
        assert!(path.exists());

        drop(db);
        assert!(!path.exists());
        assert!(!PathBuf::from(format!("{}-wal", path.display())).exists());
    }
}
