mod macros;

pub mod batch;
pub mod concurrency;
pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod metrics;
