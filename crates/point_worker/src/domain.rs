mod point_accumulation_service;

pub use point_accumulation_service::*;
