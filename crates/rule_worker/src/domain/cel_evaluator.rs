//! CEL rule expressions.
//!
//! Variables bound for every evaluation:
//!
//! | name        | CEL type                                   |
//! |-------------|--------------------------------------------|
//! | `attribute` | string                                     |
//! | `value`     | int, double, string, bool or bytes         |
//! | `timestamp` | timestamp                                  |
//! | `tenant_id` | string                                     |
//! | `device_id` | string                                     |
//!
//! ```cel
//! value > 30.0 && attribute == 'temperature'
//! ```
//!
//! Numeric comparisons between int and double are allowed. Comparing a number
//! with a string, referencing an unknown variable, a syntax error or a
//! non-boolean result are all evaluation errors. So is an arithmetic fault
//! such as integer division by zero or overflow, which the interpreter raises
//! as a panic.

use cel_interpreter::{Context, Program, Value as CelValue};
use common::domain::{DomainError, DomainResult, Envelope, ExpressionEvaluator, PointValue};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
pub struct CelExpressionEvaluator;

impl CelExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }
}

fn point_value_to_cel(value: &PointValue) -> CelValue {
    match value {
        PointValue::Int(v) => CelValue::Int(*v),
        PointValue::Float(v) => CelValue::Float(*v),
        PointValue::String(v) => CelValue::String(Arc::new(v.clone())),
        PointValue::Bool(v) => CelValue::Bool(*v),
        PointValue::Bytes(v) => CelValue::Bytes(Arc::new(v.clone())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl ExpressionEvaluator for CelExpressionEvaluator {
    fn evaluate(&self, envelope: &Envelope, expression: &str) -> DomainResult<bool> {
        catch_unwind(AssertUnwindSafe(|| compile_and_execute(envelope, expression)))
            .unwrap_or_else(|payload| {
                Err(DomainError::EvaluationError(format!(
                    "expression aborted: {}",
                    panic_message(payload.as_ref())
                )))
            })
    }
}

fn compile_and_execute(envelope: &Envelope, expression: &str) -> DomainResult<bool> {
    let program = Program::compile(expression)
        .map_err(|e| DomainError::EvaluationError(format!("compile error: {}", e)))?;

    let mut context = Context::default();
    context.add_variable_from_value(
        "attribute",
        CelValue::String(Arc::new(envelope.attribute.clone())),
    );
    context.add_variable_from_value("value", point_value_to_cel(&envelope.value));
    context.add_variable_from_value(
        "timestamp",
        CelValue::Timestamp(envelope.occurred_at.fixed_offset()),
    );
    context.add_variable_from_value(
        "tenant_id",
        CelValue::String(Arc::new(envelope.tenant_id().to_string())),
    );
    context.add_variable_from_value(
        "device_id",
        CelValue::String(Arc::new(envelope.device_id().to_string())),
    );

    match program.execute(&context) {
        Ok(CelValue::Bool(result)) => Ok(result),
        Ok(other) => Err(DomainError::EvaluationError(format!(
            "expression must return a bool, got {:?}",
            other
        ))),
        Err(e) => Err(DomainError::EvaluationError(e.to_string())),
    }
}
