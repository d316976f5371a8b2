mod client;
mod config;
mod event_repository;
mod point_repository;
mod rule_repository;

pub use client::*;
pub use config::*;
pub use event_repository::*;
pub use point_repository::*;
pub use rule_repository::*;
