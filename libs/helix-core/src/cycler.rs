//! Round-robin rotation across the three tubes.

use crate::error::{Result, SchedulerError};
use crate::state::SchedulerState;
use crate::types::{Stitch, TubeNumber};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Rotates the active tube pointer and guards against a second completion
/// starting while one is still being processed.
#[derive(Debug, Default)]
pub struct TubeCycler {
    in_flight: AtomicBool,
}

/// Proof that a rotation is in flight. Dropping it releases the guard.
#[derive(Debug)]
#[must_use = "the rotation guard is released as soon as the ticket is dropped"]
pub struct RotationTicket<'a> {
    cycler: &'a TubeCycler,
}

impl Drop for RotationTicket<'_> {
    fn drop(&mut self) {
        self.cycler.in_flight.store(false, Ordering::Release);
    }
}

/// Owned form of [`RotationTicket`] that can be moved into another task.
#[derive(Debug)]
#[must_use = "the rotation guard is released as soon as the ticket is dropped"]
pub struct OwnedRotationTicket {
    cycler: Arc<TubeCycler>,
}

impl Drop for OwnedRotationTicket {
    fn drop(&mut self) {
        self.cycler.in_flight.store(false, Ordering::Release);
    }
}

impl TubeCycler {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&self) -> Result<()> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| SchedulerError::RotationInFlight)
    }

    /// Claim the single in-flight slot.
    pub fn try_begin(&self) -> Result<RotationTicket<'_>> {
        self.claim().map(|()| RotationTicket { cycler: self })
    }

    /// Claim the slot with a ticket that keeps the cycler alive.
    pub fn try_begin_owned(self: &Arc<Self>) -> Result<OwnedRotationTicket> {
        self.claim().map(|()| OwnedRotationTicket {
            cycler: Arc::clone(self),
        })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Move the active pointer to the next tube. Wrapping back to tube 1
    /// counts one full cycle.
    pub fn rotate(&self, state: &mut SchedulerState) -> TubeNumber {
        let next = state.active_tube.next();
        if next == TubeNumber::One {
            state.cycle_count += 1;
        }
        state.active_tube = next;
        next
    }

    /// Active tube and its ready stitch.
    pub fn current(state: &SchedulerState) -> (TubeNumber, Option<&Stitch>) {
        let tube = state.current_tube();
        (tube.number, tube.active_stitch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::manifest;
    use crate::state::SeedPolicy;
    use chrono::Utc;

    #[test]
    fn rotate_cycles_and_counts_wraps() {
        let cycler = TubeCycler::new();
        let mut state = SchedulerState::seed("u1", &manifest(), SeedPolicy::default(), Utc::now());

        let seen: Vec<u8> = (0..6).map(|_| cycler.rotate(&mut state).as_u8()).collect();
        assert_eq!(seen, vec![2, 3, 1, 2, 3, 1]);
        assert_eq!(state.cycle_count, 2);
    }

    #[test]
    fn current_reports_ready_stitch() {
        let cycler = TubeCycler::new();
        let mut state = SchedulerState::seed("u1", &manifest(), SeedPolicy::default(), Utc::now());
        cycler.rotate(&mut state);
        let (tube, stitch) = TubeCycler::current(&state);
        assert_eq!(tube, TubeNumber::Two);
        assert_eq!(stitch.map(|s| s.id.as_str()), Some("t2-s0"));
    }

    #[test]
    fn second_ticket_is_rejected_until_first_dropped() {
        let cycler = TubeCycler::new();
        let ticket = cycler.try_begin().unwrap();
        assert!(cycler.is_in_flight());
        assert_eq!(cycler.try_begin().unwrap_err(), SchedulerError::RotationInFlight);
        drop(ticket);
        assert!(!cycler.is_in_flight());
        assert!(cycler.try_begin().is_ok());
    }

    #[test]
    fn owned_ticket_shares_the_slot() {
        let cycler = Arc::new(TubeCycler::new());
        let owned = cycler.try_begin_owned().unwrap();
        assert_eq!(cycler.try_begin().unwrap_err(), SchedulerError::RotationInFlight);

        let handle = std::thread::spawn(move || drop(owned));
        handle.join().unwrap();
        assert!(!cycler.is_in_flight());
        assert!(cycler.try_begin_owned().is_ok());
    }
}
