//! Repository pattern for local state storage.

use crate::db::error::DbError;
use crate::db::schema::{SCHEMA, SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use helix_core::{BackupRecord, SchedulerState, StatePayload};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;

type Result<T> = std::result::Result<T, DbError>;

/// Key of the primary local copy for a user.
pub fn primary_key(user_id: &str) -> String {
    format!("helix:state:{user_id}")
}

/// Key of the sync backup for a user. Never equal to the primary key.
pub fn backup_key(user_id: &str) -> String {
    format!("helix:backup:{user_id}")
}

/// Calculate SHA256 hash of content.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Which copy a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Primary,
    Backup,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "backup" => Some(Self::Backup),
            _ => None,
        }
    }
}

/// A serialized state as it sits in the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: String,
    pub user_id: String,
    pub kind: RecordKind,
    /// JSON payload (a `StatePayload`, or a `BackupRecord` for backups).
    pub payload: String,
    pub content_hash: String,
    pub last_updated: DateTime<Utc>,
    pub written_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    /// Encode the primary copy of a state.
    pub fn primary(state: &SchedulerState, now: DateTime<Utc>) -> Result<Self> {
        let payload = serde_json::to_string(&StatePayload::from(state))?;
        Ok(Self::new(primary_key(&state.user_id), state, RecordKind::Primary, payload, now))
    }

    /// Encode a backup of a state, stamped with the time the backup was taken.
    pub fn backup(state: &SchedulerState, now: DateTime<Utc>) -> Result<Self> {
        let record = BackupRecord {
            payload: StatePayload::from(state),
            backup_timestamp: now,
        };
        let payload = serde_json::to_string(&record)?;
        Ok(Self::new(backup_key(&state.user_id), state, RecordKind::Backup, payload, now))
    }

    fn new(
        key: String,
        state: &SchedulerState,
        kind: RecordKind,
        payload: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            user_id: state.user_id.clone(),
            kind,
            content_hash: hash_content(&payload),
            payload,
            last_updated: state.last_updated,
            written_at: now,
            synced_at: None,
        }
    }

    pub fn is_intact(&self) -> bool {
        hash_content(&self.payload) == self.content_hash
    }

    /// Verify and decode the stored state.
    pub fn decode(&self) -> Result<SchedulerState> {
        if !self.is_intact() {
            return Err(DbError::Corrupt { key: self.key.clone() });
        }
        let payload = match self.kind {
            RecordKind::Primary => serde_json::from_str::<StatePayload>(&self.payload)?,
            RecordKind::Backup => serde_json::from_str::<BackupRecord>(&self.payload)?.payload,
        };
        let state = SchedulerState::try_from(payload)?;
        let expected = match self.kind {
            RecordKind::Primary => primary_key(&state.user_id),
            RecordKind::Backup => backup_key(&state.user_id),
        };
        if expected != self.key {
            return Err(DbError::OwnerMismatch {
                key: self.key.clone(),
                user_id: state.user_id,
            });
        }
        Ok(state)
    }
}

/// An anonymous identity that has been folded into a signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMigration {
    pub anonymous_id: String,
    pub user_id: String,
    pub migrated_at: DateTime<Utc>,
}

/// Repository for state records.
pub trait StateRepository {
    fn get_record(&self, key: &str) -> Result<Option<StoredRecord>>;
    fn put_record(&self, record: &StoredRecord) -> Result<()>;
    fn delete_record(&self, key: &str) -> Result<()>;
    /// Stamp `synced_at` if the record still holds the given version.
    fn mark_synced(
        &self,
        key: &str,
        last_updated: DateTime<Utc>,
        synced_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Repository for the local anonymous identity and its migration.
pub trait IdentityRepository {
    fn get_anonymous_id(&self) -> Result<Option<String>>;
    fn save_anonymous_id(&self, anonymous_id: &str) -> Result<()>;
    fn get_migration(&self, anonymous_id: &str) -> Result<Option<IdentityMigration>>;
    /// Atomically write the surviving state under the user's key, drop the
    /// anonymous keys, forget the anonymous id, and record the migration.
    fn commit_migration(
        &self,
        migration: &IdentityMigration,
        adopted: Option<&StoredRecord>,
    ) -> Result<()>;
}

/// Everything the sync manager needs from local storage.
pub trait LocalStore: StateRepository + IdentityRepository + Send {}

impl<T: StateRepository + IdentityRepository + Send> LocalStore for T {}

/// SQLite implementation of repositories.
pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    /// Open database at path, creating if necessary.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let repo = Self { conn };
        repo.initialize()?;
        Ok(repo)
    }

    /// Open in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let repo = Self { conn };
        repo.initialize()?;
        Ok(repo)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// All record keys held for a user, primary first.
    pub fn record_keys_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_key FROM state_records WHERE user_id = ?1 ORDER BY kind DESC, record_key",
        )?;
        let keys = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StoredRecordRow> {
        Ok(StoredRecordRow {
            key: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            payload: row.get(3)?,
            content_hash: row.get(4)?,
            last_updated: row.get(5)?,
            written_at: row.get(6)?,
            synced_at: row.get(7)?,
        })
    }
}

/// Raw row before timestamp and kind parsing.
struct StoredRecordRow {
    key: String,
    user_id: String,
    kind: String,
    payload: String,
    content_hash: String,
    last_updated: String,
    written_at: String,
    synced_at: Option<String>,
}

impl TryFrom<StoredRecordRow> for StoredRecord {
    type Error = DbError;

    fn try_from(row: StoredRecordRow) -> Result<Self> {
        let kind = RecordKind::parse(&row.kind)
            .ok_or_else(|| DbError::InvalidData(format!("unknown record kind: {}", row.kind)))?;
        Ok(Self {
            key: row.key,
            user_id: row.user_id,
            kind,
            payload: row.payload,
            content_hash: row.content_hash,
            last_updated: parse_timestamp(&row.last_updated)?,
            written_at: parse_timestamp(&row.written_at)?,
            synced_at: row.synced_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::InvalidData(format!("bad timestamp {s:?}: {e}")))
}

fn put_record_on(conn: &Connection, record: &StoredRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO state_records
            (record_key, user_id, kind, payload, content_hash, last_updated, written_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.key,
            record.user_id,
            record.kind.as_str(),
            record.payload,
            record.content_hash,
            record.last_updated.to_rfc3339(),
            record.written_at.to_rfc3339(),
            record.synced_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

impl StateRepository for SqliteRepository {
    fn get_record(&self, key: &str) -> Result<Option<StoredRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT record_key, user_id, kind, payload, content_hash, last_updated, written_at, synced_at
                 FROM state_records WHERE record_key = ?1",
                params![key],
                Self::row_to_record,
            )
            .optional()?;

        row.map(StoredRecord::try_from).transpose()
    }

    fn put_record(&self, record: &StoredRecord) -> Result<()> {
        put_record_on(&self.conn, record)
    }

    fn delete_record(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM state_records WHERE record_key = ?1", params![key])?;
        Ok(())
    }

    fn mark_synced(
        &self,
        key: &str,
        last_updated: DateTime<Utc>,
        synced_at: DateTime<Utc>,
    ) -> Result<bool> {
        let count = self.conn.execute(
            "UPDATE state_records SET synced_at = ?1 WHERE record_key = ?2 AND last_updated = ?3",
            params![synced_at.to_rfc3339(), key, last_updated.to_rfc3339()],
        )?;
        Ok(count > 0)
    }
}

impl IdentityRepository for SqliteRepository {
    fn get_anonymous_id(&self) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT anonymous_id FROM local_identity WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    fn save_anonymous_id(&self, anonymous_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO local_identity (id, anonymous_id, created_at) VALUES (1, ?1, ?2)",
            params![anonymous_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get_migration(&self, anonymous_id: &str) -> Result<Option<IdentityMigration>> {
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT anonymous_id, user_id, migrated_at FROM identity_migrations WHERE anonymous_id = ?1",
                params![anonymous_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        row.map(|(anonymous_id, user_id, migrated_at)| {
            Ok(IdentityMigration {
                anonymous_id,
                user_id,
                migrated_at: parse_timestamp(&migrated_at)?,
            })
        })
        .transpose()
    }

    fn commit_migration(
        &self,
        migration: &IdentityMigration,
        adopted: Option<&StoredRecord>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        if let Some(record) = adopted {
            put_record_on(&tx, record)?;
        }
        tx.execute(
            "DELETE FROM state_records WHERE record_key IN (?1, ?2)",
            params![
                primary_key(&migration.anonymous_id),
                backup_key(&migration.anonymous_id)
            ],
        )?;
        tx.execute(
            "DELETE FROM local_identity WHERE anonymous_id = ?1",
            params![migration.anonymous_id],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO identity_migrations (anonymous_id, user_id, migrated_at) VALUES (?1, ?2, ?3)",
            params![
                migration.anonymous_id,
                migration.user_id,
                migration.migrated_at.to_rfc3339()
            ],
        )?;

        tx.commit()?;
        Ok(())
    }
}
