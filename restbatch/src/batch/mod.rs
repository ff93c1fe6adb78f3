//! Batch-handling layer turning a list of sub-requests into a cohort.

pub mod executor;
pub mod handler;
pub mod request;

pub use executor::BatchExecutor;
pub use handler::RequestHandler;
pub use request::{BatchRequest, BatchResponse, BatchResponseItem, Method, SubRequest};
