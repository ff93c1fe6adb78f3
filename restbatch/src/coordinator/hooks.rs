use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::coordinator::UnitId;
use crate::coordinator::state::CohortState;
use crate::error::BatchResult;

/// Callback invoked once per phase transition, before any unit of the new phase wakes up.
///
/// This is where work registered by many units during the previous phase is performed in
/// bulk: one query resolving every pending by-key lookup, one statement applying every
/// queued row mutation. Returning an error fails the whole cohort.
#[async_trait]
pub trait PhaseHook<C>: Send + Sync {
    /// Runs before the phase described by `cohort` starts.
    async fn before_phase(&self, cohort: &CohortView<'_, C>) -> BatchResult<()>;
}

/// Read view over a cohort handed to [`PhaseHook`]s.
///
/// Every pending unit is suspended while hooks run, so hooks may lock any pending context
/// without contending with a running unit.
pub struct CohortView<'a, C> {
    phase: usize,
    state: &'a CohortState,
    contexts: &'a [Arc<Mutex<C>>],
    pending: &'a BTreeSet<UnitId>,
    unit_phases: &'a [usize],
}

impl<'a, C> CohortView<'a, C> {
    pub(crate) fn new(
        phase: usize,
        state: &'a CohortState,
        contexts: &'a [Arc<Mutex<C>>],
        pending: &'a BTreeSet<UnitId>,
        unit_phases: &'a [usize],
    ) -> Self {
        Self {
            phase,
            state,
            contexts,
            pending,
            unit_phases,
        }
    }

    /// Returns the number of the phase about to start, starting from 0.
    pub fn phase(&self) -> usize {
        self.phase
    }

    /// Returns the cohort-wide state.
    pub fn state(&self) -> &'a CohortState {
        self.state
    }

    /// Returns the ids of the units that have not completed yet, in submission order.
    pub fn pending(&self) -> impl Iterator<Item = UnitId> + 'a {
        self.pending.iter().copied()
    }

    /// Returns `true` if the unit has not completed yet.
    pub fn is_pending(&self, id: UnitId) -> bool {
        self.pending.contains(&id)
    }

    /// Returns the context of a unit.
    pub fn context(&self, id: UnitId) -> Option<&'a Arc<Mutex<C>>> {
        self.contexts.get(id)
    }

    /// Returns every context of the cohort, including the ones of completed units.
    pub fn contexts(&self) -> impl Iterator<Item = (UnitId, &'a Arc<Mutex<C>>)> + 'a {
        self.contexts.iter().enumerate()
    }

    /// Returns the contexts of the pending units, in submission order.
    pub fn pending_contexts(&self) -> impl Iterator<Item = (UnitId, &'a Arc<Mutex<C>>)> + 'a {
        let contexts = self.contexts;
        self.pending
            .iter()
            .filter_map(move |id| contexts.get(*id).map(|context| (*id, context)))
    }

    /// Returns how many phase boundaries a unit has passed.
    pub fn unit_phase(&self, id: UnitId) -> Option<usize> {
        self.unit_phases.get(id).copied()
    }
}

impl<C> fmt::Debug for CohortView<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CohortView")
            .field("cohort_id", &self.state.id())
            .field("phase", &self.phase)
            .field("pending", &self.pending)
            .finish()
    }
}

/// Ordered list of [`PhaseHook`]s run at every phase transition.
pub struct HookInvoker<C> {
    hooks: Vec<Arc<dyn PhaseHook<C>>>,
}

impl<C> HookInvoker<C> {
    /// Creates an empty [`HookInvoker`].
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Appends a hook. Hooks run in registration order.
    pub fn push<H>(&mut self, hook: H)
    where
        H: PhaseHook<C> + 'static,
    {
        self.hooks.push(Arc::new(hook));
    }

    /// Appends an already shared hook.
    pub fn push_shared(&mut self, hook: Arc<dyn PhaseHook<C>>) {
        self.hooks.push(hook);
    }

    /// Returns the number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns `true` if no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs every hook in order, stopping at the first failure.
    pub async fn invoke(&self, cohort: &CohortView<'_, C>) -> BatchResult<()> {
        for (index, hook) in self.hooks.iter().enumerate() {
            debug!(hook = index, phase = cohort.phase(), "running phase hook");

            if let Err(err) = hook.before_phase(cohort).await {
                error!(hook = index, phase = cohort.phase(), error = %err, "phase hook failed");
                return Err(err);
            }
        }

        Ok(())
    }
}

impl<C> Default for HookInvoker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for HookInvoker<C> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<C> fmt::Debug for HookInvoker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookInvoker")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
