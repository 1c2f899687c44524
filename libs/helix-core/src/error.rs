//! Error types for helix-core.

use crate::types::TubeNumber;
use thiserror::Error;

/// Result type alias using SchedulerError.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Rejections of a completion event. Nothing is mutated when one of these
/// is returned, so the caller can resync its view and retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("stale active stitch in tube {tube}: expected {expected:?}, got {actual} (thread {thread_id})")]
    StaleActiveStitch {
        tube: TubeNumber,
        thread_id: String,
        expected: Option<String>,
        actual: String,
    },

    #[error("degenerate session: total questions is {total}")]
    DegenerateSession { total: u32 },

    #[error("invalid score: {correct} correct out of {total}")]
    InvalidScore { correct: u32, total: u32 },

    #[error("a rotation is already in flight")]
    RotationInFlight,
}

/// Violations of the position invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("position {position} is already occupied by {occupant}")]
    PositionOccupied { position: u32, occupant: String },

    #[error("stitch {stitch_id} already sits at position {position}")]
    DuplicateStitch { stitch_id: String, position: u32 },

    #[error("position 0 is empty in a non-empty tube")]
    MissingActive,
}

/// Errors decoding a persisted or synced payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("missing tube {0}")]
    MissingTube(u8),

    #[error("unknown tube key {0:?}")]
    UnknownTube(String),

    #[error("invalid position key {key:?} in tube {tube}")]
    InvalidPosition { tube: u8, key: String },

    #[error("invalid active tube number {0}")]
    InvalidActiveTube(u8),

    #[error("tube {tube}: {source}")]
    Positions {
        tube: u8,
        #[source]
        source: PositionError,
    },
}
