use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::batch_error;
use crate::coordinator::{CohortView, PhaseHook, UnitId};
use crate::error::{BatchError, BatchResult, ErrorKind};

/// Failure of a single row, attributed to the unit that queued it.
#[derive(Debug, Clone)]
pub struct RowFailure {
    pub unit: UnitId,
    pub error: BatchError,
}

/// Result of a [`BulkWriter::write`] call that was executed.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    /// Number of rows applied.
    pub applied: usize,
    /// Rows that could not be applied.
    pub failures: Vec<RowFailure>,
}

/// Store able to apply many row mutations in a single statement.
pub trait BulkWriter {
    /// Row mutation (insert, update or delete) queued by a unit.
    type Mutation: Send + 'static;

    /// Applies `mutations`, each tagged with the unit that queued it.
    ///
    /// Row-level problems are reported in the [`WriteReport`]. An `Err` means the statement as
    /// a whole failed and fails the cohort.
    fn write(
        &self,
        mutations: Vec<(UnitId, Self::Mutation)>,
    ) -> impl Future<Output = BatchResult<WriteReport>> + Send;
}

/// Per-unit queue of row mutations, embedded in the unit context.
#[derive(Debug)]
pub struct MutationQueue<M> {
    queued: Vec<M>,
    applied: usize,
    failure: Option<BatchError>,
}

impl<M> MutationQueue<M> {
    /// Creates an empty [`MutationQueue`].
    pub fn new() -> Self {
        Self {
            queued: Vec::new(),
            applied: 0,
            failure: None,
        }
    }

    /// Queues `mutation` for the next bulk write.
    pub fn push(&mut self, mutation: M) {
        self.queued.push(mutation);
    }

    /// Returns the number of mutations waiting for the next bulk write.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Returns `true` if no mutation is waiting.
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Returns how many mutations of this unit were written without a row failure.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Takes the row failure recorded for this unit by the last bulk write, if any.
    pub fn take_failure(&mut self) -> Option<BatchError> {
        self.failure.take()
    }

    fn take_queued(&mut self) -> Vec<M> {
        std::mem::take(&mut self.queued)
    }

    fn record_failure(&mut self, error: BatchError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }
}

impl<M> Default for MutationQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Unit context exposing a [`MutationQueue`] to [`BulkMutationHook`].
pub trait MutationContext<M> {
    fn mutations(&mut self) -> &mut MutationQueue<M>;
}

/// Phase hook applying the mutations queued by every pending unit with one
/// [`BulkWriter::write`] call.
///
/// Units with a row failure get the failure recorded in their queue and are marked doomed in
/// the cohort state. The unit is expected to check [`MutationQueue::take_failure`] after the
/// phase and fail with it.
#[derive(Debug, Clone)]
pub struct BulkMutationHook<W> {
    writer: W,
}

impl<W> BulkMutationHook<W> {
    /// Creates a new [`BulkMutationHook`] backed by `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the underlying writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }
}

#[async_trait]
impl<C, W> PhaseHook<C> for BulkMutationHook<W>
where
    C: MutationContext<W::Mutation> + Send + 'static,
    W: BulkWriter + Send + Sync + 'static,
{
    async fn before_phase(&self, cohort: &CohortView<'_, C>) -> BatchResult<()> {
        let mut mutations = Vec::new();
        let mut queued_per_unit = Vec::new();

        for (id, context) in cohort.pending_contexts() {
            let queued = {
                let mut context = context.lock().await;
                context.mutations().take_queued()
            };

            if queued.is_empty() {
                continue;
            }

            queued_per_unit.push((id, queued.len()));
            mutations.extend(queued.into_iter().map(|mutation| (id, mutation)));
        }

        if mutations.is_empty() {
            return Ok(());
        }

        debug!(
            phase = cohort.phase(),
            rows = mutations.len(),
            units = queued_per_unit.len(),
            "applying coalesced mutations"
        );

        let report = match self.writer.write(mutations).await {
            Ok(report) => report,
            Err(err) => {
                error!(phase = cohort.phase(), error = %err, "bulk write failed");
                return Err(batch_error!(
                    ErrorKind::HookFailed,
                    "Bulk write failed",
                    detail = format!("phase {}", cohort.phase()),
                    source: err
                ));
            }
        };

        let mut failed_rows = vec![0usize; cohort.state().unit_count()];
        for failure in report.failures {
            let Some(context) = cohort.context(failure.unit) else {
                warn!(unit_id = failure.unit, "row failure reported for an unknown unit");
                continue;
            };

            cohort.state().mark_doomed(failure.unit);
            if let Some(count) = failed_rows.get_mut(failure.unit) {
                *count += 1;
            }

            let mut context = context.lock().await;
            context.mutations().record_failure(failure.error);
        }

        for (id, queued) in queued_per_unit {
            let Some(context) = cohort.context(id) else {
                continue;
            };

            let failed = failed_rows.get(id).copied().unwrap_or_default();
            let mut context = context.lock().await;
            let queue = context.mutations();
            queue.applied += queued.saturating_sub(failed);
        }

        Ok(())
    }
}
