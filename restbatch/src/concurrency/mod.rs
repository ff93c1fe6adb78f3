//! Concurrency primitives shared by the coordinator and the batch layer.
//!
//! - [`admission`] is the system-wide, non-blocking gate that limits how many cohorts (and
//!   how much per-cohort concurrency) the process accepts at once.
//! - [`cancel`] carries client-initiated cancellation into a running cohort.

pub mod admission;
pub mod cancel;
