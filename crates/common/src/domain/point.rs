use crate::domain::envelope::{Envelope, PointValue};
use crate::domain::outcome::{CreateOutcome, MAX_BINARY_VALUE_LEN, MAX_IDENTIFIER_LEN};
use crate::domain::result::DomainResult;
use crate::domain::time::truncate_to_millis;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use garde::Validate;

/// Persisted measurement accumulated per device and attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatedPoint {
    pub tenant_id: String,
    pub device_id: String,
    pub attribute: String,
    pub value: PointValue,
    pub occurred_at: DateTime<Utc>,
    pub trace_id: String,
}

/// Input for accumulating a point.
///
/// `(tenant_id, device_id, attribute, occurred_at)` is the dedup tuple.
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct CreatePointInput {
    #[garde(length(min = 1, max = MAX_IDENTIFIER_LEN))]
    pub tenant_id: String,
    #[garde(length(min = 1, max = MAX_IDENTIFIER_LEN))]
    pub device_id: String,
    #[garde(length(min = 1, max = MAX_IDENTIFIER_LEN))]
    pub attribute: String,
    #[garde(custom(bounded_value))]
    pub value: PointValue,
    #[garde(skip)]
    pub occurred_at: DateTime<Utc>,
    #[garde(length(max = MAX_IDENTIFIER_LEN))]
    pub trace_id: String,
}

fn bounded_value(value: &PointValue, _ctx: &()) -> garde::Result {
    match value {
        PointValue::Bytes(bytes) if bytes.len() > MAX_BINARY_VALUE_LEN => Err(garde::Error::new(
            format!(
                "binary value of {} bytes exceeds {} bytes",
                bytes.len(),
                MAX_BINARY_VALUE_LEN
            ),
        )),
        PointValue::String(s) if s.len() > MAX_BINARY_VALUE_LEN => Err(garde::Error::new(
            format!(
                "string value of {} bytes exceeds {} bytes",
                s.len(),
                MAX_BINARY_VALUE_LEN
            ),
        )),
        _ => Ok(()),
    }
}

impl CreatePointInput {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            tenant_id: envelope.tenant_id().to_string(),
            device_id: envelope.device_id().to_string(),
            attribute: envelope.attribute.clone(),
            value: envelope.value.clone(),
            occurred_at: truncate_to_millis(envelope.occurred_at),
            trace_id: envelope.trace_id.clone(),
        }
    }
}

impl From<CreatePointInput> for AccumulatedPoint {
    fn from(input: CreatePointInput) -> Self {
        AccumulatedPoint {
            tenant_id: input.tenant_id,
            device_id: input.device_id,
            attribute: input.attribute,
            value: input.value,
            occurred_at: input.occurred_at,
            trace_id: input.trace_id,
        }
    }
}

/// Idempotent point store, same tombstone contract as `EventRepository`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PointRepository: Send + Sync {
    async fn create_point(&self, input: CreatePointInput) -> DomainResult<CreateOutcome>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AccumulatedPointProducer: Send + Sync {
    async fn publish_point(&self, envelope: &Envelope) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: PointValue) -> CreatePointInput {
        CreatePointInput {
            tenant_id: "tenant-1".to_string(),
            device_id: "device-1".to_string(),
            attribute: "payload".to_string(),
            value,
            occurred_at: Utc::now(),
            trace_id: "trace-1".to_string(),
        }
    }

    #[test]
    fn test_binary_value_within_bound() {
        assert!(input(PointValue::Bytes(vec![0u8; MAX_BINARY_VALUE_LEN]))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_binary_value_over_bound() {
        assert!(input(PointValue::Bytes(vec![0u8; MAX_BINARY_VALUE_LEN + 1]))
            .validate()
            .is_err());
    }

    #[test]
    fn test_empty_attribute_rejected() {
        let mut point = input(PointValue::Float(21.5));
        point.attribute.clear();
        assert!(point.validate().is_err());
    }
}
