//! Position-based scheduling for a single tube.
//!
//! A perfect drill sends the finished stitch back into its tube at the
//! absolute position given by its new skip-number, pulling the stitches in
//! between one step closer to the front. A partial drill resets the
//! skip-number and leaves the stitch at the front.

pub mod policy;

pub use policy::next_skip_number;

use crate::error::{Result, SchedulerError};
use crate::state::Tube;
use crate::types::SkipNumber;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What a completion did to its stitch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvanceOutcome {
    pub stitch_id: String,
    pub was_perfect: bool,
    pub previous_skip: SkipNumber,
    pub new_skip: SkipNumber,
    /// Where the finished stitch ended up.
    pub new_position: u32,
    /// Stitch now at position 0.
    pub next_active: Option<String>,
}

/// Result of advancing a tube after a drill.
#[derive(Debug, Clone)]
pub struct AdvanceResult {
    pub tube: Tube,
    pub outcome: AdvanceOutcome,
}

/// Check the score alone.
pub fn validate_score(correct: u32, total: u32) -> Result<()> {
    if total == 0 {
        return Err(SchedulerError::DegenerateSession { total });
    }
    if correct > total {
        return Err(SchedulerError::InvalidScore { correct, total });
    }
    Ok(())
}

/// Check a completion event against a tube without mutating anything.
pub fn validate_completion(
    tube: &Tube,
    thread_id: &str,
    stitch_id: &str,
    correct: u32,
    total: u32,
) -> Result<()> {
    validate_score(correct, total)?;
    if tube.thread_id != thread_id || tube.active_stitch_id() != Some(stitch_id) {
        return Err(stale(tube, stitch_id));
    }
    Ok(())
}

/// Apply a finished drill to the stitch at position 0 of `tube`.
pub fn advance(
    tube: &Tube,
    stitch_id: &str,
    correct: u32,
    total: u32,
    now: DateTime<Utc>,
) -> Result<AdvanceResult> {
    validate_score(correct, total)?;
    if tube.active_stitch_id() != Some(stitch_id) {
        return Err(stale(tube, stitch_id));
    }

    let mut next = tube.clone();
    let Some(mut stitch) = next.positions.remove(0) else {
        return Err(stale(tube, stitch_id));
    };

    let was_perfect = correct == total;
    let previous_skip = stitch.skip_number;
    let new_skip = next_skip_number(previous_skip, was_perfect);
    stitch.skip_number = new_skip;
    stitch.last_completed_at = Some(now);

    if was_perfect {
        stitch.perfect_completions += 1;
        let target = new_skip.value();
        next.positions.shift_down(1, target);
        next.positions.place(target, stitch);
        // Short tubes can leave position 0 empty after the shift.
        next.positions.compact();
    } else {
        next.positions.place(0, stitch);
    }

    let new_position = next.positions.position_of(stitch_id).unwrap_or_default();
    let outcome = AdvanceOutcome {
        stitch_id: stitch_id.to_string(),
        was_perfect,
        previous_skip,
        new_skip,
        new_position,
        next_active: next.active_stitch_id().map(str::to_string),
    };

    Ok(AdvanceResult { tube: next, outcome })
}

fn stale(tube: &Tube, stitch_id: &str) -> SchedulerError {
    SchedulerError::StaleActiveStitch {
        tube: tube.number,
        thread_id: tube.thread_id.clone(),
        expected: tube.active_stitch_id().map(str::to_string),
        actual: stitch_id.to_string(),
    }
}
