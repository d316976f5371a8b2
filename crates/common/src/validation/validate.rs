//! Garde validation utilities.

use crate::domain::DomainError;
use garde::{Report, Validate};

/// Validate a record before it reaches storage.
///
/// Any violated bound surfaces as `DomainError::InvalidFormat`, which the
/// pipelines treat as a permanent, record-local failure.
pub fn validate_record<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| DomainError::InvalidFormat(format_validation_errors(&report)))
}

/// Format validation errors from garde Report into a human-readable string
fn format_validation_errors(report: &Report) -> String {
    report
        .iter()
        .map(|(path, error)| {
            if path.to_string().is_empty() {
                error.message().to_string()
            } else {
                format!("{}: {}", path, error.message())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CreateEventInput, CreatePointInput, PointValue, MAX_BINARY_VALUE_LEN};
    use chrono::Utc;

    fn event_input() -> CreateEventInput {
        CreateEventInput {
            tenant_id: "tenant-1".to_string(),
            device_id: "device-1".to_string(),
            rule_id: "rule-1".to_string(),
            created_at: Utc::now(),
            trace_id: "trace-1".to_string(),
        }
    }

    #[test]
    fn test_valid_event_passes() {
        assert!(validate_record(&event_input()).is_ok());
    }

    #[test]
    fn test_oversized_device_id_is_invalid_format() {
        let mut input = event_input();
        input.device_id = "d".repeat(300);

        let result = validate_record(&input);
        match result {
            Err(DomainError::InvalidFormat(msg)) => assert!(msg.contains("device_id")),
            other => panic!("Expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_binary_point_is_invalid_format() {
        let input = CreatePointInput {
            tenant_id: "tenant-1".to_string(),
            device_id: "device-1".to_string(),
            attribute: "frame".to_string(),
            value: PointValue::Bytes(vec![0xAB; MAX_BINARY_VALUE_LEN + 10]),
            occurred_at: Utc::now(),
            trace_id: String::new(),
        };

        let result = validate_record(&input);
        match result {
            Err(DomainError::InvalidFormat(msg)) => assert!(msg.contains("value")),
            other => panic!("Expected InvalidFormat, got {:?}", other),
        }
    }
}
