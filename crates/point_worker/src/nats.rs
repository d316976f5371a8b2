mod point_producer;

pub use point_producer::*;
