mod admission;
mod base;
mod batch;
mod coordinator;
mod service;

pub use admission::*;
pub use base::*;
pub use batch::*;
pub use coordinator::*;
pub use service::*;
