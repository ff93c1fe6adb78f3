use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use uuid::Uuid;

use crate::concurrency::cancel::CancelRx;
use crate::coordinator::UnitId;

/// The unit is known to fail because of a row-level failure attributed to it.
const UNIT_DOOMED: u8 = 1 << 0;
/// The unit has returned or failed.
const UNIT_ENDED: u8 = 1 << 1;
/// A stop signal (cancellation or abort) has been delivered to the unit.
const UNIT_STOPPED: u8 = 1 << 2;

/// Cohort-wide state shared by the controller, the syncers and the phase hooks.
///
/// This is the primary context of a cohort: the single point of truth for the flags that
/// must be decided cohort-wide. Per-unit flags are plain atomics so hooks and units can
/// read them without coordination.
#[derive(Debug)]
pub struct CohortState {
    id: Uuid,
    read_only: bool,
    cancel_rx: Option<CancelRx>,
    failure_broadcast: AtomicBool,
    units: Box<[AtomicU8]>,
}

impl CohortState {
    /// Creates the state for a cohort of `unit_count` units.
    pub fn new(unit_count: usize, read_only: bool, cancel_rx: Option<CancelRx>) -> Self {
        Self {
            id: Uuid::new_v4(),
            read_only,
            cancel_rx,
            failure_broadcast: AtomicBool::new(false),
            units: (0..unit_count).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Returns the identifier of the cohort, used to correlate logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the number of units in the cohort.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` if the cohort performs no shared mutation.
    ///
    /// Failures in a read-only cohort never cancel sibling units.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns `true` once the client cancelled the cohort.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Returns `true` once a sibling-cancellation broadcast happened for this cohort.
    pub fn failure_broadcast(&self) -> bool {
        self.failure_broadcast.load(Ordering::Acquire)
    }

    /// Marks that the sibling-cancellation broadcast is starting.
    ///
    /// Returns `false` if a broadcast already happened.
    pub(crate) fn begin_failure_broadcast(&self) -> bool {
        !self.failure_broadcast.swap(true, Ordering::AcqRel)
    }

    /// Marks a unit as doomed by a row-level failure already attributed to it.
    ///
    /// Doomed units are skipped by the sibling-cancellation broadcast: they are resumed as usual
    /// and report their own failure.
    pub fn mark_doomed(&self, id: UnitId) {
        self.set_flag(id, UNIT_DOOMED);
    }

    /// Returns `true` if the unit was marked doomed.
    pub fn is_doomed(&self, id: UnitId) -> bool {
        self.has_flag(id, UNIT_DOOMED)
    }

    /// Returns `true` once the unit returned or failed.
    pub fn is_ended(&self, id: UnitId) -> bool {
        self.has_flag(id, UNIT_ENDED)
    }

    /// Returns `true` once a stop signal was delivered to the unit.
    pub fn is_stopped(&self, id: UnitId) -> bool {
        self.has_flag(id, UNIT_STOPPED)
    }

    pub(crate) fn mark_ended(&self, id: UnitId) {
        self.set_flag(id, UNIT_ENDED);
    }

    pub(crate) fn mark_stopped(&self, id: UnitId) {
        self.set_flag(id, UNIT_STOPPED);
    }

    fn set_flag(&self, id: UnitId, flag: u8) {
        if let Some(flags) = self.units.get(id) {
            flags.fetch_or(flag, Ordering::AcqRel);
        }
    }

    fn has_flag(&self, id: UnitId, flag: u8) -> bool {
        self.units
            .get(id)
            .is_some_and(|flags| flags.load(Ordering::Acquire) & flag != 0)
    }
}
