//! Tracing and metrics initialisation for batch services and their tests.

pub mod metrics;
pub mod tracing;
