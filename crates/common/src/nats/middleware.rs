mod consumer_logging;
mod consumer_tracing;
mod consumer_types;
mod publish_logging;
mod publish_tracing;
mod publish_types;
mod publisher;

pub use consumer_logging::*;
pub use consumer_tracing::*;
pub use consumer_types::*;
pub use publish_logging::*;
pub use publish_tracing::*;
pub use publish_types::*;
pub use publisher::*;
