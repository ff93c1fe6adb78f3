use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, trace_span};

use crate::batch_error;
use crate::coordinator::UnitId;
use crate::coordinator::state::CohortState;
use crate::coordinator::unit::Operation;
use crate::error::{BatchError, BatchResult, ErrorKind};

/// Events reported by units to the controller of their cohort.
#[derive(Debug)]
pub(crate) enum CohortEvent<T> {
    /// The unit reached its first phase boundary and waits for the first phase to start.
    Ready { id: UnitId },
    /// The unit reached a phase boundary and is now suspended.
    StepDone { id: UnitId, phase: usize },
    /// The unit returned a value.
    JobDone { id: UnitId, value: T },
    /// The unit failed or panicked.
    JobFailed { id: UnitId, error: BatchError },
}

/// Signals delivered by the controller to a suspended unit.
#[derive(Debug)]
pub(crate) enum Signal {
    /// Continue with the next phase.
    Resume,
    /// Stop: the error is raised from the pending [`PhaseSyncer::phase`] call.
    Fail(BatchError),
}

/// Sink for step events, erasing the output type of the cohort from the syncer.
///
/// Both methods return `false` if the controller is gone.
pub(crate) trait StepSink: Send + Sync {
    /// Reports that unit `id` is present and waiting for the first phase.
    fn ready(&self, id: UnitId) -> bool;

    /// Reports that unit `id` finished `phase`.
    fn step_done(&self, id: UnitId, phase: usize) -> bool;
}

impl<T> StepSink for mpsc::UnboundedSender<CohortEvent<T>>
where
    T: Send,
{
    fn ready(&self, id: UnitId) -> bool {
        self.send(CohortEvent::Ready { id }).is_ok()
    }

    fn step_done(&self, id: UnitId, phase: usize) -> bool {
        self.send(CohortEvent::StepDone { id, phase }).is_ok()
    }
}

/// Per-unit handle used by an operation to rendezvous with its cohort.
///
/// The syncer owns the unit side of the suspend/resume protocol. The controller owns the
/// other side and decides when the unit may continue.
pub struct PhaseSyncer<C> {
    id: UnitId,
    phase: usize,
    context: Arc<Mutex<C>>,
    cohort: Arc<CohortState>,
    steps: Box<dyn StepSink>,
    signals: mpsc::UnboundedReceiver<Signal>,
    failure: Option<BatchError>,
}

impl<C> PhaseSyncer<C> {
    pub(crate) fn new(
        id: UnitId,
        context: Arc<Mutex<C>>,
        cohort: Arc<CohortState>,
        steps: Box<dyn StepSink>,
        signals: mpsc::UnboundedReceiver<Signal>,
    ) -> Self {
        Self {
            id,
            phase: 0,
            context,
            cohort,
            steps,
            signals,
            failure: None,
        }
    }

    /// Returns the identifier of the unit, which is its position in submission order.
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Returns how many times the unit called [`PhaseSyncer::phase`].
    pub fn phase_nr(&self) -> usize {
        self.phase
    }

    /// Returns the cohort-wide state.
    pub fn cohort(&self) -> &CohortState {
        &self.cohort
    }

    /// Locks and returns the per-unit context.
    ///
    /// The guard must not be held across [`PhaseSyncer::phase`], since phase hooks lock every
    /// pending context between phases.
    pub async fn context(&self) -> MutexGuard<'_, C> {
        self.context.lock().await
    }

    /// Suspends the unit until the next phase of the cohort starts.
    ///
    /// The unit runs as soon as it is created, so its first call only reports that the unit is
    /// present and waits for the first phase to start. Every later call reports the end of the
    /// current phase.
    ///
    /// Returns an error if the controller stopped the unit while it was suspended (a sibling
    /// failed, the client cancelled, or the cohort was aborted). Once a stop error has been
    /// delivered, every later call returns it again without suspending.
    pub async fn phase(&mut self) -> BatchResult<()> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        let reported = if self.phase == 0 {
            self.steps.ready(self.id)
        } else {
            self.steps.step_done(self.id, self.phase - 1)
        };
        if !reported {
            return Err(self.fail_closed());
        }
        self.phase += 1;

        self.wait_for_signal().await
    }

    async fn wait_for_signal(&mut self) -> BatchResult<()> {
        match self.signals.recv().await {
            Some(Signal::Resume) => Ok(()),
            Some(Signal::Fail(err)) => {
                debug!(unit_id = self.id, kind = ?err.kind(), "unit stopped while suspended");
                self.failure = Some(err.clone());
                Err(err)
            }
            None => Err(self.fail_closed()),
        }
    }

    fn fail_closed(&mut self) -> BatchError {
        let err = batch_error!(
            ErrorKind::CoordinatorClosed,
            "Cohort controller is no longer running",
            self.id
        );
        self.failure = Some(err.clone());
        err
    }
}

/// Spawns the background task running one unit.
///
/// The operation starts right away and the task reports exactly one completion event. Panics
/// are caught and reported as [`ErrorKind::UnitPanic`] failures so that the cohort never waits
/// on a unit that is gone.
pub(crate) fn spawn_unit<C, O>(
    syncer: PhaseSyncer<C>,
    operation: O,
    events_tx: mpsc::UnboundedSender<CohortEvent<O::Output>>,
) -> JoinHandle<()>
where
    C: Send + 'static,
    O: Operation<C>,
{
    let id = syncer.id;
    let cohort = syncer.cohort.clone();
    let span = trace_span!("unit", unit_id = id);

    let task = async move {
        let result = AssertUnwindSafe(operation.run(syncer))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_error(id, panic)));

        cohort.mark_ended(id);

        let event = match result {
            Ok(value) => CohortEvent::JobDone { id, value },
            Err(error) => CohortEvent::JobFailed { id, error },
        };

        // The receiver is gone only after the cohort settled every unit.
        let _ = events_tx.send(event);
    };

    tokio::spawn(task.instrument(span))
}

/// Converts a caught panic payload into a [`BatchError`].
fn panic_error(id: UnitId, panic: Box<dyn Any + Send>) -> BatchError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    error!(unit_id = id, panic = %message, "operation unit panicked");

    batch_error!(
        ErrorKind::UnitPanic,
        "Operation unit panicked",
        detail = format!("unit {id}: {message}")
    )
}
