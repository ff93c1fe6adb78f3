use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::{counter, gauge};
use restbatch_config::shared::AdmissionConfig;
use tracing::debug;

use crate::metrics::{RESTBATCH_ADMISSION_REJECTIONS_TOTAL, RESTBATCH_PIPELINES_IN_FLIGHT};

#[derive(Debug)]
struct AdmissionInner {
    max_pipelines: usize,
    in_flight: AtomicUsize,
    extra_drops: AtomicUsize,
}

/// System-wide gate limiting how many pipeline slots are in flight at once.
///
/// All operations return immediately. A slot is the unit of accounting used for both whole
/// cohorts and the concurrency granted inside a cohort: a batch asking for a concurrency of
/// `n` reserves up to `n` slots.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    inner: Arc<AdmissionInner>,
}

impl AdmissionController {
    /// Creates a new [`AdmissionController`] from configuration.
    pub fn new(config: &AdmissionConfig) -> Self {
        Self::with_max_pipelines(config.max_pipelines)
    }

    /// Creates a new [`AdmissionController`] with an explicit slot ceiling.
    pub fn with_max_pipelines(max_pipelines: usize) -> Self {
        Self {
            inner: Arc::new(AdmissionInner {
                max_pipelines,
                in_flight: AtomicUsize::new(0),
                extra_drops: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns whether a new pipeline would currently be accepted.
    ///
    /// Pending extra drops are consumed one per call and force a `false` answer regardless of
    /// the remaining capacity.
    pub fn can_accept(&self) -> bool {
        let dropped = self
            .inner
            .extra_drops
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |drops| {
                drops.checked_sub(1)
            })
            .is_ok();

        let accepted =
            !dropped && self.inner.in_flight.load(Ordering::Acquire) < self.inner.max_pipelines;
        if !accepted {
            debug!(dropped, in_flight = self.in_flight(), "admission refused");
            counter!(RESTBATCH_ADMISSION_REJECTIONS_TOTAL).increment(1);
        }

        accepted
    }

    /// Reserves up to `requested` slots and returns how many were granted.
    ///
    /// At least one slot is always granted, even past the ceiling, so that a caller which must
    /// make progress is never starved.
    pub fn start_pipeline(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        let mut granted = 1;
        let _ = self
            .inner
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                let available = self.inner.max_pipelines.saturating_sub(in_flight);
                granted = requested.min(available).max(1);
                in_flight.checked_add(granted)
            });

        gauge!(RESTBATCH_PIPELINES_IN_FLIGHT).set(self.in_flight() as f64);

        granted
    }

    /// Releases `count` previously granted slots.
    pub fn end_pipeline(&self, count: usize) {
        let _ = self
            .inner
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                Some(in_flight.saturating_sub(count))
            });

        gauge!(RESTBATCH_PIPELINES_IN_FLIGHT).set(self.in_flight() as f64);
    }

    /// Forces the next `count` calls to [`AdmissionController::can_accept`] to return `false`.
    pub fn add_extra_drops(&self, count: usize) {
        self.inner.extra_drops.fetch_add(count, Ordering::AcqRel);
    }

    /// Reserves slots like [`AdmissionController::start_pipeline`] and returns a guard that
    /// releases them on drop.
    pub fn reserve(&self, requested: usize) -> PipelineSlots {
        let granted = self.start_pipeline(requested);

        PipelineSlots {
            controller: self.clone(),
            granted,
        }
    }

    /// Returns the number of slots currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Returns the configured slot ceiling.
    pub fn max_pipelines(&self) -> usize {
        self.inner.max_pipelines
    }
}

/// RAII guard that returns its granted slots to the [`AdmissionController`] on drop.
#[derive(Debug)]
pub struct PipelineSlots {
    controller: AdmissionController,
    granted: usize,
}

impl PipelineSlots {
    /// Returns how many slots this guard holds.
    pub fn granted(&self) -> usize {
        self.granted
    }
}

impl Drop for PipelineSlots {
    fn drop(&mut self) {
        self.controller.end_pipeline(self.granted);
    }
}
