use std::sync::Arc;

use restbatch_config::shared::ServiceConfig;
use tracing::{info, warn};

use crate::batch::handler::RequestHandler;
use crate::batch::request::{BatchRequest, BatchResponse, BatchResponseItem};
use crate::concurrency::admission::AdmissionController;
use crate::concurrency::cancel::CancelRx;
use crate::coordinator::{HookInvoker, PhaseHook, PhaseSyncer, SubmitOptions, submit};
use crate::error::{BatchResult, ErrorKind};
use crate::{bail, ensure};

/// Executes batch requests as coordinated cohorts.
///
/// Every batch goes through admission control first. Its sub-requests then run as units of
/// one cohort sharing the registered phase hooks, and the settled records are mapped onto
/// per-item responses.
pub struct BatchExecutor<H: RequestHandler> {
    handler: Arc<H>,
    hooks: HookInvoker<H::Context>,
    admission: AdmissionController,
    max_requests: usize,
    concurrency: usize,
}

impl<H> BatchExecutor<H>
where
    H: RequestHandler,
{
    /// Creates a new [`BatchExecutor`] sharing `admission` with the rest of the process.
    pub fn new(handler: H, admission: AdmissionController, config: &ServiceConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            hooks: HookInvoker::new(),
            admission,
            max_requests: config.batch.max_requests,
            concurrency: config.batch_concurrency(),
        }
    }

    /// Creates a new [`BatchExecutor`] with its own admission controller.
    pub fn from_config(handler: H, config: &ServiceConfig) -> Self {
        Self::new(handler, AdmissionController::new(&config.admission), config)
    }

    /// Registers a hook run before every phase of every batch.
    pub fn with_hook<P>(mut self, hook: P) -> Self
    where
        P: PhaseHook<H::Context> + 'static,
    {
        self.hooks.push(hook);
        self
    }

    /// Returns the admission controller gating this executor.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Executes every sub-request of `request` and returns one response per sub-request.
    ///
    /// Fails without running anything when the batch is empty, exceeds the configured size,
    /// or is refused by admission control. Failures of individual sub-requests never fail
    /// the batch: they are reported in their response item.
    pub async fn execute(
        &self,
        request: BatchRequest,
        cancel_rx: Option<CancelRx>,
    ) -> BatchResult<BatchResponse> {
        ensure!(
            !request.requests.is_empty(),
            ErrorKind::ValidationError,
            "Batch contains no requests"
        );

        let count = request.requests.len();
        ensure!(
            count <= self.max_requests,
            ErrorKind::ValidationError,
            "Batch contains too many requests",
            detail = format!("{count} requests, at most {} allowed", self.max_requests)
        );

        if !self.admission.can_accept() {
            warn!(requests = count, "batch refused by admission control");
            bail!(
                ErrorKind::Overloaded,
                "Too many batches in flight",
                detail = format!("{} pipeline slots in flight", self.admission.in_flight())
            );
        }

        let slots = self.admission.reserve(self.concurrency);
        let read_only = request.is_read_only();

        info!(
            requests = count,
            concurrency = slots.granted(),
            read_only,
            "executing batch"
        );

        let units = request
            .requests
            .into_iter()
            .enumerate()
            .map(|(id, sub_request)| {
                let context = self.handler.context(id, &sub_request);
                let handler = self.handler.clone();
                let operation = move |syncer: PhaseSyncer<H::Context>| async move {
                    handler.handle(sub_request, syncer).await
                };

                (context, operation)
            })
            .collect();

        let mut options = SubmitOptions::new(slots.granted())
            .read_only(read_only)
            .with_hooks(self.hooks.clone());
        if let Some(cancel_rx) = cancel_rx {
            options = options.with_cancellation(cancel_rx);
        }

        let settled = submit(units, options).await;
        drop(slots);

        Ok(BatchResponse {
            responses: settled.into_iter().map(BatchResponseItem::from).collect(),
        })
    }
}
