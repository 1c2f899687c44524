//! Shared test data.

use crate::state::{ContentManifest, ThreadManifest};

/// Three threads of 4, 3 and 2 stitches named `<thread>-s<i>`.
pub fn manifest() -> ContentManifest {
    sized_manifest([4, 3, 2])
}

pub fn sized_manifest(sizes: [usize; 3]) -> ContentManifest {
    let thread = |t: &str, n: usize| ThreadManifest {
        thread_id: t.to_string(),
        stitch_ids: (0..n).map(|i| format!("{t}-s{i}")).collect(),
    };
    ContentManifest {
        tubes: [
            thread("t1", sizes[0]),
            thread("t2", sizes[1]),
            thread("t3", sizes[2]),
        ],
    }
}
