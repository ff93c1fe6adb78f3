//! Phase hooks coalescing per-unit store access into bulk operations.
//!
//! Units register what they need in their context during a phase. Before the next phase the
//! hooks perform the work for the whole cohort at once:
//!
//! - [`KeyedLookupHook`] resolves every requested key with one [`BulkLoader::load`] call.
//! - [`BulkMutationHook`] applies every queued row mutation with one [`BulkWriter::write`]
//!   call and marks units with row failures as doomed.
//!
//! [`MemoryStore`] implements both store traits in memory.

pub mod lookup;
pub mod memory;
pub mod mutation;

pub use lookup::{BulkLoader, KeyedLookupHook, LookupContext, LookupTable};
pub use memory::{MemoryStore, RowMutation};
pub use mutation::{
    BulkMutationHook, BulkWriter, MutationContext, MutationQueue, RowFailure, WriteReport,
};
