pub mod domain;
pub mod nats;
pub mod point_worker;

pub use domain::*;
pub use nats::*;
pub use point_worker::*;
