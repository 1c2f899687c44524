//! Aggregate scheduler state and how it is first seeded.

use crate::positions::PositionStore;
use crate::types::{Points, SkipNumber, Stitch, TubeNumber};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One content lane and its stitch queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tube {
    pub number: TubeNumber,
    pub thread_id: String,
    pub positions: PositionStore,
}

impl Tube {
    pub fn new(number: TubeNumber, thread_id: impl Into<String>) -> Self {
        Self {
            number,
            thread_id: thread_id.into(),
            positions: PositionStore::new(),
        }
    }

    /// Id of the stitch at position 0.
    pub fn active_stitch_id(&self) -> Option<&str> {
        self.positions.active().map(|s| s.id.as_str())
    }

    pub fn active_stitch(&self) -> Option<&Stitch> {
        self.positions.active()
    }
}

/// Initial content for one tube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadManifest {
    pub thread_id: String,
    pub stitch_ids: Vec<String>,
}

/// Initial content for all three tubes, in tube order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentManifest {
    pub tubes: [ThreadManifest; 3],
}

/// Skip-number given to every stitch when a state is first seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    #[default]
    StartAtOne,
    StartAtThree,
}

impl SeedPolicy {
    pub fn skip_number(self) -> SkipNumber {
        match self {
            Self::StartAtOne => SkipNumber::One,
            Self::StartAtThree => SkipNumber::Three,
        }
    }
}

/// Everything the scheduler persists for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub user_id: String,
    pub active_tube: TubeNumber,
    pub tubes: [Tube; 3],
    pub cycle_count: u64,
    pub points: Points,
    pub last_updated: DateTime<Utc>,
}

impl SchedulerState {
    /// Seed a fresh state: position `i` holds the `i`-th manifest stitch.
    ///
    /// Repeated stitch ids within a thread keep their first position only.
    pub fn seed(
        user_id: impl Into<String>,
        manifest: &ContentManifest,
        policy: SeedPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let tubes = TubeNumber::ALL.map(|number| {
            let thread = &manifest.tubes[number.index()];
            let mut tube = Tube::new(number, thread.thread_id.clone());
            let mut position = 0;
            for stitch_id in &thread.stitch_ids {
                let stitch = Stitch::new(stitch_id.clone(), policy.skip_number());
                if tube.positions.insert(position, stitch).is_ok() {
                    position += 1;
                }
            }
            tube
        });

        Self {
            user_id: user_id.into(),
            active_tube: TubeNumber::One,
            tubes,
            cycle_count: 0,
            points: Points::default(),
            last_updated: now,
        }
    }

    pub fn tube(&self, number: TubeNumber) -> &Tube {
        &self.tubes[number.index()]
    }

    pub fn tube_mut(&mut self, number: TubeNumber) -> &mut Tube {
        &mut self.tubes[number.index()]
    }

    /// The tube whose ready stitch is shown to the learner.
    pub fn current_tube(&self) -> &Tube {
        self.tube(self.active_tube)
    }

    /// Stamp a mutation. Timestamps never go backwards and never repeat,
    /// so last-write-wins can always order two local writes.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.last_updated + Duration::milliseconds(1);
        self.last_updated = if now > self.last_updated { now } else { floor };
    }
}
