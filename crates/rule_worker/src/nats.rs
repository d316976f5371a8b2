mod rule_event_producer;

pub use rule_event_producer::*;
