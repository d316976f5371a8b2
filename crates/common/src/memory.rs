//! In-memory queue and stores for tests and local runs.

mod queue;
mod repositories;

pub use queue::*;
pub use repositories::*;
