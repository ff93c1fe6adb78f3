use std::future::Future;

use crate::coordinator::syncer::PhaseSyncer;
use crate::error::BatchResult;

/// A cooperative operation that runs as one unit of a cohort.
///
/// The operation receives its [`PhaseSyncer`] and calls [`PhaseSyncer::phase`] wherever it
/// needs the whole cohort to rendezvous, typically right after registering work that a
/// phase hook performs in bulk for every unit.
///
/// Any `FnOnce(PhaseSyncer<C>) -> Future` closure is an operation, which is how the
/// (function, arguments) pairs of a batch are usually expressed: the closure captures the
/// arguments.
pub trait Operation<C>: Send + 'static {
    /// Value produced when the operation completes.
    type Output: Send + 'static;

    /// Runs the operation to completion.
    fn run(self, syncer: PhaseSyncer<C>) -> impl Future<Output = BatchResult<Self::Output>> + Send;
}

impl<C, F, Fut, T> Operation<C> for F
where
    F: FnOnce(PhaseSyncer<C>) -> Fut + Send + 'static,
    Fut: Future<Output = BatchResult<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn run(self, syncer: PhaseSyncer<C>) -> impl Future<Output = BatchResult<Self::Output>> + Send {
        self(syncer)
    }
}
