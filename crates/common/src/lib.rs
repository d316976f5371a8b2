pub mod domain;
pub mod nats;
pub mod pipeline_metrics;
pub mod postgres;
pub mod proto;
pub mod telemetry;
pub mod validation;

#[cfg(any(test, feature = "testing"))]
pub mod memory;
