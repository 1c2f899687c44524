//! Core Triple-Helix scheduler shared by every client.
//!
//! Provides:
//! - Position store for each tube's stitch queue
//! - Skip-number policy and the tube advance algorithm
//! - Round-robin tube cycler with an in-flight guard
//! - Scheduler state, seeding, and its JSON wire payload

pub mod cycler;
pub mod error;
pub mod payload;
pub mod positions;
pub mod scheduler;
pub mod state;
pub mod types;

#[cfg(test)]
mod fixtures;

pub use cycler::{OwnedRotationTicket, RotationTicket, TubeCycler};
pub use error::{PayloadError, PositionError, Result, SchedulerError};
pub use payload::{BackupRecord, PositionPayload, StatePayload, TubePayload};
pub use positions::PositionStore;
pub use scheduler::{advance, next_skip_number, validate_completion, AdvanceOutcome, AdvanceResult};
pub use state::{ContentManifest, SchedulerState, SeedPolicy, ThreadManifest, Tube};
pub use types::{DistractorLevel, Points, SkipNumber, Stitch, TubeNumber};
