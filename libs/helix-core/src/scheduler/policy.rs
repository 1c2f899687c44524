//! Skip-number policy.

use crate::types::SkipNumber;

/// Skip-number after a finished drill.
///
/// A perfect score climbs exactly one tier (saturating at 100); anything
/// less drops back to the first tier.
pub fn next_skip_number(current: SkipNumber, was_perfect: bool) -> SkipNumber {
    if was_perfect {
        current.step_up()
    } else {
        SkipNumber::One
    }
}
