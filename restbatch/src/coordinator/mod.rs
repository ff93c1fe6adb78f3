//! Cooperative cohort coordinator.
//!
//! A cohort is a set of operation units submitted together through [`submit`]. Every unit
//! runs as its own task and suspends at [`PhaseSyncer::phase`]. The controller decides which
//! units are awake, enforces the per-cohort concurrency ceiling, and starts a new phase only
//! once every unit of the current one has stepped or finished. Between phases the registered
//! [`PhaseHook`]s run, which is where per-unit work is coalesced into bulk operations.
//!
//! When a unit of a cohort that is not read-only fails, every other pending unit is stopped
//! with a sibling-cancellation error. Results are always returned as [`Settled`] records, one
//! per unit and in submission order.

mod controller;
mod hooks;
mod settle;
mod state;
mod syncer;
mod unit;

pub use controller::{SubmitOptions, submit};
pub use hooks::{CohortView, HookInvoker, PhaseHook};
pub use settle::{ErrorBody, Settled, UnitOutcome, settle};
pub use state::CohortState;
pub use syncer::PhaseSyncer;
pub use unit::Operation;

/// Identifier of a unit inside its cohort: its position in submission order.
pub type UnitId = usize;
