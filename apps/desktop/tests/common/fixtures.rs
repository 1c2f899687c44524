//! Test fixtures and factory functions for creating scheduler content.

use chrono::{Duration, Utc};
use helix_core::{ContentManifest, SchedulerState, SeedPolicy, StatePayload, ThreadManifest};

/// Thread id for a tube: "t1", "t2", "t3".
pub fn thread_id(tube: u8) -> String {
    format!("t{tube}")
}

/// Stitch id at seed position `index` of `tube`.
pub fn stitch_id(tube: u8, index: usize) -> String {
    format!("t{tube}-s{index}")
}

/// Manifest with the given number of stitches per tube.
pub fn manifest(sizes: [usize; 3]) -> ContentManifest {
    let thread = |tube: u8, size: usize| ThreadManifest {
        thread_id: thread_id(tube),
        stitch_ids: (0..size).map(|i| stitch_id(tube, i)).collect(),
    };
    ContentManifest {
        tubes: [thread(1, sizes[0]), thread(2, sizes[1]), thread(3, sizes[2])],
    }
}

/// Five stitches in every tube.
pub fn default_manifest() -> ContentManifest {
    manifest([5, 5, 5])
}

/// Remote copy for `user_id` stamped `minutes` from now, with a marker cycle count.
pub fn remote_copy(user_id: &str, minutes: i64, cycle_count: u64) -> StatePayload {
    let mut state = SchedulerState::seed(
        user_id,
        &default_manifest(),
        SeedPolicy::StartAtOne,
        Utc::now() + Duration::minutes(minutes),
    );
    state.cycle_count = cycle_count;
    StatePayload::from(&state)
}
