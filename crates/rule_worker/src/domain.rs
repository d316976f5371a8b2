mod cel_evaluator;
mod rule_evaluation_service;

pub use cel_evaluator::*;
pub use rule_evaluation_service::*;
