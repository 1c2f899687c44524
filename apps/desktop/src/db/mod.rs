//! Local SQLite storage for scheduler state.

pub mod error;
pub mod repository;
pub mod schema;

pub use error::DbError;
pub use repository::{
    backup_key, hash_content, primary_key, IdentityMigration, IdentityRepository, LocalStore,
    RecordKind, SqliteRepository, StateRepository, StoredRecord,
};
