//! SQLite schema definitions.

/// Current schema version for migrations.
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema for the local SQLite database.
pub const SCHEMA: &str = r#"
-- Locally generated anonymous identity (at most one)
CREATE TABLE IF NOT EXISTS local_identity (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    anonymous_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Primary state copies and sync backups, keyed by derived record key
CREATE TABLE IF NOT EXISTS state_records (
    record_key TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('primary', 'backup')),
    payload TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    written_at TEXT NOT NULL,
    synced_at TEXT
);

-- Anonymous identities already folded into an authenticated user
CREATE TABLE IF NOT EXISTS identity_migrations (
    anonymous_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    migrated_at TEXT NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_state_records_user ON state_records(user_id);
"#;

