mod client;
mod envelope_consumer;
mod middleware;
mod trace_context;
mod traits;
mod worker_pool;

pub use client::*;
pub use envelope_consumer::*;
pub use middleware::*;
pub use trace_context::*;
pub use traits::*;
pub use worker_pool::*;
