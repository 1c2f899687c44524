//! Database error types.

use helix_core::PayloadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("record {key} failed its content hash check")]
    Corrupt { key: String },

    #[error("record {key} holds state for {user_id}")]
    OwnerMismatch { key: String, user_id: String },

    #[error("invalid data: {0}")]
    InvalidData(String),
}
