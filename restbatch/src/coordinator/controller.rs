use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use restbatch_config::shared::CoordinatorConfig;
use tokio::sync::{Mutex, mpsc};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::batch_error;
use crate::concurrency::cancel::CancelRx;
use crate::coordinator::UnitId;
use crate::coordinator::hooks::{CohortView, HookInvoker, PhaseHook};
use crate::coordinator::settle::{Settled, UnitOutcome, settle};
use crate::coordinator::state::CohortState;
use crate::coordinator::syncer::{CohortEvent, PhaseSyncer, Signal, spawn_unit};
use crate::coordinator::unit::Operation;
use crate::error::{BatchError, BatchResult, ErrorKind};
use crate::metrics::{
    ERROR_KIND_LABEL, RESTBATCH_COHORT_ABORTS_TOTAL, RESTBATCH_COHORTS_TOTAL,
    RESTBATCH_PHASES_TOTAL, RESTBATCH_SIBLING_CANCELLATIONS_TOTAL,
};

/// Options of a single [`submit`] call.
pub struct SubmitOptions<C> {
    concurrency: usize,
    read_only: bool,
    cancel_rx: Option<CancelRx>,
    hooks: HookInvoker<C>,
}

impl<C> SubmitOptions<C> {
    /// Creates options allowing at most `concurrency` awake units per phase.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            read_only: false,
            cancel_rx: None,
            hooks: HookInvoker::new(),
        }
    }

    /// Creates options with the configured default concurrency.
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.concurrency)
    }

    /// Marks the cohort as read-only, which disables sibling cancellation.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Lets the client cancel the cohort through `cancel_rx`.
    pub fn with_cancellation(mut self, cancel_rx: CancelRx) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Registers a hook run before every phase.
    pub fn with_hook<H>(mut self, hook: H) -> Self
    where
        H: PhaseHook<C> + 'static,
    {
        self.hooks.push(hook);
        self
    }

    /// Replaces the registered hooks.
    pub fn with_hooks(mut self, hooks: HookInvoker<C>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Returns the requested concurrency.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

/// Runs every unit as part of one cohort and returns one settled record per unit, in
/// submission order.
///
/// Each unit is paired with its per-unit context and starts running right away. Units
/// rendezvous at [`PhaseSyncer::phase`]: the first phase starts once every unit has reached
/// its first call, a new phase starts only once every unit of the current phase has stepped or
/// finished, and the registered hooks run before each phase. At most `concurrency` units
/// are awake at the same time within a phase.
///
/// This function never fails: every failure mode, including panicking units and failing
/// hooks, ends up in the settled record of the affected units.
pub async fn submit<C, O>(units: Vec<(C, O)>, options: SubmitOptions<C>) -> Vec<Settled<O::Output>>
where
    C: Send + 'static,
    O: Operation<C>,
{
    if units.is_empty() {
        return Vec::new();
    }

    let SubmitOptions {
        concurrency,
        read_only,
        cancel_rx,
        hooks,
    } = options;

    let concurrency = if concurrency == 0 {
        warn!("cohort concurrency of 0 requested, using 1");
        1
    } else {
        concurrency
    };

    let state = Arc::new(CohortState::new(units.len(), read_only, cancel_rx));
    let span = info_span!(
        "cohort",
        cohort_id = %state.id(),
        units = units.len(),
        concurrency,
        read_only
    );

    async move {
        let (events_tx, events_rx) = mpsc::unbounded_channel::<CohortEvent<O::Output>>();

        let mut contexts = Vec::with_capacity(units.len());
        let mut signals = Vec::with_capacity(units.len());
        for (id, (context, operation)) in units.into_iter().enumerate() {
            let context = Arc::new(Mutex::new(context));
            let (signal_tx, signal_rx) = mpsc::unbounded_channel();
            let syncer = PhaseSyncer::new(
                id,
                context.clone(),
                state.clone(),
                Box::new(events_tx.clone()),
                signal_rx,
            );

            spawn_unit(syncer, operation, events_tx.clone());

            contexts.push(context);
            signals.push(signal_tx);
        }

        // Only the units keep the event channel open from now on.
        drop(events_tx);

        PhaseController::new(state, concurrency, hooks, contexts, signals, events_rx)
            .run()
            .await
    }
    .instrument(span)
    .await
}

/// Stop delivered to a unit, overriding the outcome the unit reports.
#[derive(Debug, Clone)]
enum Stopped {
    /// Sibling or client cancellation. Replaces a successful outcome only.
    Cancelled(BatchError),
    /// The cohort was aborted. Replaces any outcome.
    Aborted(BatchError),
}

/// Barrier controller of one cohort.
///
/// Events are processed one at a time, which is what makes the bookkeeping below safe: no two
/// handlers ever observe the sets concurrently.
struct PhaseController<C, T> {
    state: Arc<CohortState>,
    concurrency: usize,
    hooks: HookInvoker<C>,
    contexts: Vec<Arc<Mutex<C>>>,
    signals: Vec<mpsc::UnboundedSender<Signal>>,
    events_rx: mpsc::UnboundedReceiver<CohortEvent<T>>,
    /// Phase boundaries passed by each unit.
    unit_phases: Vec<usize>,
    /// Units that have not finished yet.
    pending: BTreeSet<UnitId>,
    /// Units that have neither reached their first phase boundary nor finished.
    starting: BTreeSet<UnitId>,
    /// Units of the current phase that have neither stepped nor finished.
    phase_pending: BTreeSet<UnitId>,
    /// Units of the current phase held back by the concurrency ceiling.
    queued: BTreeSet<UnitId>,
    outcomes: Vec<Option<UnitOutcome<T>>>,
    stopped: Vec<Option<Stopped>>,
    phase: usize,
    aborted: bool,
}

impl<C, T> PhaseController<C, T>
where
    C: Send + 'static,
    T: Send + 'static,
{
    fn new(
        state: Arc<CohortState>,
        concurrency: usize,
        hooks: HookInvoker<C>,
        contexts: Vec<Arc<Mutex<C>>>,
        signals: Vec<mpsc::UnboundedSender<Signal>>,
        events_rx: mpsc::UnboundedReceiver<CohortEvent<T>>,
    ) -> Self {
        let unit_count = contexts.len();

        Self {
            state,
            concurrency,
            hooks,
            contexts,
            signals,
            events_rx,
            unit_phases: vec![0; unit_count],
            pending: (0..unit_count).collect(),
            starting: (0..unit_count).collect(),
            phase_pending: BTreeSet::new(),
            queued: BTreeSet::new(),
            outcomes: (0..unit_count).map(|_| None).collect(),
            stopped: vec![None; unit_count],
            phase: 0,
            aborted: false,
        }
    }

    async fn run(mut self) -> Vec<Settled<T>> {
        counter!(RESTBATCH_COHORTS_TOTAL).increment(1);

        while !self.pending.is_empty() {
            let Some(event) = self.events_rx.recv().await else {
                error!(
                    pending = self.pending.len(),
                    "event channel closed with units still pending"
                );
                for id in std::mem::take(&mut self.pending) {
                    self.record(
                        id,
                        Err(batch_error!(
                            ErrorKind::CoordinatorClosed,
                            "Operation unit stopped without reporting an outcome",
                            id
                        )),
                    );
                }
                break;
            };

            if let Err(err) = self.handle_event(event).await {
                self.abort(err);
            }
        }

        debug!(phases = self.phase, "cohort settled");

        settle(self.outcomes)
    }

    async fn handle_event(&mut self, event: CohortEvent<T>) -> BatchResult<()> {
        match event {
            CohortEvent::Ready { id } => {
                self.starting.remove(&id);
                self.advance().await
            }
            CohortEvent::StepDone { id, phase } => self.on_step_done(id, phase).await,
            CohortEvent::JobDone { id, value } => {
                self.finish(id, Ok(value));
                self.advance().await
            }
            CohortEvent::JobFailed { id, error } => {
                debug!(unit_id = id, kind = ?error.kind(), "unit failed");
                self.finish(id, Err(error));

                if !self.aborted
                    && !self.state.is_read_only()
                    && self.state.begin_failure_broadcast()
                {
                    self.broadcast_sibling_failure(id);
                }

                self.advance().await
            }
        }
    }

    async fn on_step_done(&mut self, id: UnitId, phase: usize) -> BatchResult<()> {
        if !self.phase_pending.remove(&id) {
            debug!(unit_id = id, phase, "ignoring step of a unit outside the current phase");
            return Ok(());
        }

        if let Some(unit_phase) = self.unit_phases.get_mut(id) {
            *unit_phase = phase + 1;
        }

        if !self.aborted && self.state.is_cancelled() {
            self.cancel_by_client();
            return Ok(());
        }

        self.advance().await
    }

    async fn advance(&mut self) -> BatchResult<()> {
        // The first phase waits for every unit to be present.
        if self.aborted || !self.starting.is_empty() {
            return Ok(());
        }

        if self.phase_pending.is_empty() {
            self.start_new_phase().await
        } else {
            self.start_queued_job()
        }
    }

    async fn start_new_phase(&mut self) -> BatchResult<()> {
        let runnable: Vec<UnitId> = self
            .pending
            .iter()
            .copied()
            .filter(|id| !self.state.is_stopped(*id))
            .collect();

        let split = runnable.len().min(self.concurrency);
        let (wake, queue) = runnable.split_at(split);

        self.phase_pending = runnable.iter().copied().collect();
        self.queued = queue.iter().copied().collect();

        if wake.is_empty() {
            return Ok(());
        }

        debug!(
            phase = self.phase,
            waking = wake.len(),
            queued = queue.len(),
            "starting phase"
        );
        counter!(RESTBATCH_PHASES_TOTAL).increment(1);

        let view = CohortView::new(
            self.phase,
            &self.state,
            &self.contexts,
            &self.phase_pending,
            &self.unit_phases,
        );
        self.hooks.invoke(&view).await?;

        for id in wake {
            self.resume(*id)?;
        }

        self.phase += 1;

        Ok(())
    }

    /// Wakes one queued unit in place of an awake unit that stepped or finished.
    fn start_queued_job(&mut self) -> BatchResult<()> {
        let mut awake = self.phase_pending.len() - self.queued.len();
        if awake > self.concurrency {
            error!(
                awake,
                concurrency = self.concurrency,
                "more units awake than the concurrency allows"
            );
            return Ok(());
        }

        while awake < self.concurrency {
            let Some(id) = self.queued.pop_first() else {
                break;
            };
            self.resume(id)?;
            awake += 1;
        }

        Ok(())
    }

    fn resume(&self, id: UnitId) -> BatchResult<()> {
        let Some(signal_tx) = self.signals.get(id) else {
            return Err(batch_error!(
                ErrorKind::InvalidState,
                "Attempted to resume an unknown unit",
                id
            ));
        };

        if signal_tx.send(Signal::Resume).is_err() {
            return Err(batch_error!(
                ErrorKind::InvalidState,
                "Attempted to resume a unit that is no longer running",
                id
            ));
        }

        Ok(())
    }

    fn finish(&mut self, id: UnitId, result: BatchResult<T>) {
        self.pending.remove(&id);
        self.starting.remove(&id);
        self.phase_pending.remove(&id);
        self.queued.remove(&id);
        self.record(id, result);
    }

    fn record(&mut self, id: UnitId, result: BatchResult<T>) {
        let Some(slot) = self.outcomes.get_mut(id) else {
            warn!(unit_id = id, "outcome reported for an unknown unit");
            return;
        };
        if slot.is_some() {
            warn!(unit_id = id, "duplicate outcome reported, keeping the first one");
            return;
        }

        let stopped = self.stopped.get_mut(id).and_then(Option::take);
        let outcome = match (stopped, result) {
            (Some(Stopped::Aborted(err)), _) => UnitOutcome::InternalError(err),
            (Some(Stopped::Cancelled(err)), Ok(_)) => UnitOutcome::DomainError(err),
            (_, result) => UnitOutcome::from_result(result),
        };

        *slot = Some(outcome);
    }

    fn broadcast_sibling_failure(&mut self, failed: UnitId) {
        let err = batch_error!(
            ErrorKind::SiblingCancelled,
            "Operation cancelled because a sibling operation failed",
            detail = format!("unit {failed} failed")
        );

        let cancelled = self.cancel_pending(&err, Stopped::Cancelled(err.clone()), false);

        warn!(
            failed_unit = failed,
            cancelled, "unit failed, cancelling sibling units"
        );
        counter!(RESTBATCH_SIBLING_CANCELLATIONS_TOTAL).increment(1);
    }

    fn cancel_by_client(&mut self) {
        let err = batch_error!(ErrorKind::ClientCancelled, "Operation cancelled by client");

        let cancelled = self.cancel_pending(&err, Stopped::Cancelled(err.clone()), true);
        self.aborted = true;

        info!(cancelled, "cohort cancelled by client");
    }

    fn abort(&mut self, err: BatchError) {
        error!(error = %err, "cohort aborted");
        counter!(
            RESTBATCH_COHORT_ABORTS_TOTAL,
            ERROR_KIND_LABEL => format!("{:?}", err.kind())
        )
        .increment(1);

        let internal = err.into_internal();

        // Units already cancelled settle with the abort error as well.
        for id in &self.pending {
            if let Some(slot) = self.stopped.get_mut(*id) {
                if matches!(slot, Some(Stopped::Cancelled(_))) {
                    *slot = Some(Stopped::Aborted(internal.clone()));
                }
            }
        }

        let delivered = batch_error!(
            ErrorKind::SiblingCancelled,
            "Operation cancelled due to an internal error"
        );
        self.cancel_pending(&delivered, Stopped::Aborted(internal), true);
        self.aborted = true;
    }

    /// Delivers `delivered` to every pending unit that was not stopped yet and returns how
    /// many units were stopped.
    ///
    /// Units that already ended keep their own outcome. Doomed units are skipped unless
    /// `include_doomed` is set.
    fn cancel_pending(
        &mut self,
        delivered: &BatchError,
        stopped: Stopped,
        include_doomed: bool,
    ) -> usize {
        let targets: Vec<UnitId> = self
            .pending
            .iter()
            .copied()
            .filter(|id| {
                !self.state.is_stopped(*id)
                    && !self.state.is_ended(*id)
                    && (include_doomed || !self.state.is_doomed(*id))
            })
            .collect();

        for id in &targets {
            let id = *id;
            self.state.mark_stopped(id);

            // Queued units are not awake, so the phase no longer waits for them. Awake units
            // stay in the phase until they step or finish.
            if self.queued.remove(&id) {
                self.phase_pending.remove(&id);
            }

            if let Some(slot) = self.stopped.get_mut(id) {
                *slot = Some(stopped.clone());
            }

            if let Some(signal_tx) = self.signals.get(id) {
                // A closed channel means the unit already finished and its outcome is on the way.
                let _ = signal_tx.send(Signal::Fail(delivered.clone()));
            }
        }

        targets.len()
    }
}
