//! Per-tube ordered mapping from position to stitch.

use crate::error::PositionError;
use crate::types::Stitch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered queue of stitches for one tube. Position 0 is "due now".
///
/// Every mutating method keeps the position invariant: a position holds at
/// most one stitch and a stitch id appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionStore {
    entries: BTreeMap<u32, Stitch>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(position, stitch)` pairs, rejecting collisions.
    pub fn from_entries<I>(entries: I) -> Result<Self, PositionError>
    where
        I: IntoIterator<Item = (u32, Stitch)>,
    {
        let mut store = Self::new();
        for (position, stitch) in entries {
            store.insert(position, stitch)?;
        }
        Ok(store)
    }

    /// Place a stitch at a free position.
    pub fn insert(&mut self, position: u32, stitch: Stitch) -> Result<(), PositionError> {
        if let Some(occupant) = self.entries.get(&position) {
            return Err(PositionError::PositionOccupied {
                position,
                occupant: occupant.id.clone(),
            });
        }
        if let Some(existing) = self.position_of(&stitch.id) {
            return Err(PositionError::DuplicateStitch {
                stitch_id: stitch.id,
                position: existing,
            });
        }
        self.entries.insert(position, stitch);
        Ok(())
    }

    pub fn get(&self, position: u32) -> Option<&Stitch> {
        self.entries.get(&position)
    }

    pub fn get_mut(&mut self, position: u32) -> Option<&mut Stitch> {
        self.entries.get_mut(&position)
    }

    /// Position currently held by a stitch id.
    pub fn position_of(&self, stitch_id: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, stitch)| stitch.id == stitch_id)
            .map(|(position, _)| *position)
    }

    /// The ready stitch at position 0.
    pub fn active(&self) -> Option<&Stitch> {
        self.entries.get(&0)
    }

    pub fn remove(&mut self, position: u32) -> Option<Stitch> {
        self.entries.remove(&position)
    }

    /// Put a stitch at a position the caller has already vacated.
    pub(crate) fn place(&mut self, position: u32, stitch: Stitch) {
        debug_assert!(!self.entries.contains_key(&position));
        self.entries.insert(position, stitch);
    }

    /// Move every entry in `first..=last` one position down.
    ///
    /// Position `first - 1` must be free; entries are moved in ascending
    /// order so no two ever collide.
    pub(crate) fn shift_down(&mut self, first: u32, last: u32) {
        debug_assert!(first >= 1);
        debug_assert!(!self.entries.contains_key(&(first - 1)));
        let moving: Vec<u32> = self.entries.range(first..=last).map(|(p, _)| *p).collect();
        for position in moving {
            if let Some(stitch) = self.entries.remove(&position) {
                self.entries.insert(position - 1, stitch);
            }
        }
    }

    /// Close a gap at the head of the queue so position 0 is occupied again.
    pub fn compact(&mut self) {
        let Some(first) = self.entries.keys().next().copied() else {
            return;
        };
        if first == 0 {
            return;
        }
        let shifted = std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(position, stitch)| (position - first, stitch))
            .collect();
        self.entries = shifted;
    }

    /// Check the position invariant.
    pub fn validate(&self) -> Result<(), PositionError> {
        let mut seen: BTreeMap<&str, u32> = BTreeMap::new();
        for (position, stitch) in &self.entries {
            if let Some(first) = seen.insert(stitch.id.as_str(), *position) {
                return Err(PositionError::DuplicateStitch {
                    stitch_id: stitch.id.clone(),
                    position: first,
                });
            }
        }
        if !self.entries.is_empty() && !self.entries.contains_key(&0) {
            return Err(PositionError::MissingActive);
        }
        Ok(())
    }

    /// Iterate in ascending position order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Stitch)> {
        self.entries.iter().map(|(position, stitch)| (*position, stitch))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
