use async_trait::async_trait;
use serde_json::Value;

use crate::batch::request::SubRequest;
use crate::coordinator::{PhaseSyncer, UnitId};
use crate::error::BatchResult;

/// Executes the sub-requests of a batch.
///
/// Each sub-request runs as one unit of the batch cohort. The handler registers bulk work in
/// the unit context and calls [`PhaseSyncer::phase`] to let the phase hooks of the executor
/// perform it for every sub-request at once.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Per-unit context handed to the phase hooks.
    type Context: Send + 'static;

    /// Creates the context of sub-request `id`.
    fn context(&self, id: UnitId, request: &SubRequest) -> Self::Context;

    /// Executes `request` and returns the response body.
    async fn handle(
        &self,
        request: SubRequest,
        syncer: PhaseSyncer<Self::Context>,
    ) -> BatchResult<Value>;
}
