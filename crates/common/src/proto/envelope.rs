use crate::domain::{DeviceDescriptor, Envelope, PointValue, RuleFiring};
use crate::nats::is_subject_token;
use crate::proto::messages::{
    measurement::Value, Device, Measurement, PointEnvelope, PointMessage, RuleDescriptor,
    RuleEventMessage,
};
use chrono::{DateTime, TimeZone, Utc};
use prost::Message;
use prost_types::Timestamp;
use thiserror::Error;

/// Why an input payload could not become an [`Envelope`]. Both are permanent.
#[derive(Debug, Error)]
pub enum EnvelopeDecodeError {
    #[error("failed to decode envelope: {0}")]
    Malformed(#[from] prost::DecodeError),

    #[error("invalid envelope: {0}")]
    Invalid(&'static str),
}

/// Decode and validate an input payload
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, EnvelopeDecodeError> {
    let proto = PointEnvelope::decode(payload)?;
    point_envelope_proto_to_domain(proto)
}

pub fn point_envelope_proto_to_domain(
    proto: PointEnvelope,
) -> Result<Envelope, EnvelopeDecodeError> {
    let measurement = proto
        .measurement
        .ok_or(EnvelopeDecodeError::Invalid("missing measurement"))?;
    let device = proto
        .device
        .ok_or(EnvelopeDecodeError::Invalid("missing device"))?;

    let device = DeviceDescriptor {
        tenant_id: device.tenant_id,
        device_id: device.device_id,
        raw_id: Some(device.raw_id).filter(|id| !id.is_empty()),
        tags: device.tags,
    };
    if device.tenant_id.is_empty() {
        return Err(EnvelopeDecodeError::Invalid("missing tenant_id"));
    }
    if !is_subject_token(&device.tenant_id) {
        return Err(EnvelopeDecodeError::Invalid("tenant_id is not a subject token"));
    }
    if device.logical_id().is_none() {
        return Err(EnvelopeDecodeError::Invalid("missing device identifier"));
    }
    if measurement.attribute.is_empty() {
        return Err(EnvelopeDecodeError::Invalid("missing attribute"));
    }

    let value = match measurement
        .value
        .ok_or(EnvelopeDecodeError::Invalid("missing value"))?
    {
        Value::IntValue(v) => PointValue::Int(v),
        Value::DoubleValue(v) => PointValue::Float(v),
        Value::StringValue(v) => PointValue::String(v),
        Value::BoolValue(v) => PointValue::Bool(v),
        Value::BytesValue(v) => PointValue::Bytes(v),
    };

    let occurred_at = timestamp_to_datetime(
        measurement
            .timestamp
            .ok_or(EnvelopeDecodeError::Invalid("missing timestamp"))?,
    )
    .ok_or(EnvelopeDecodeError::Invalid("timestamp out of range"))?;

    Ok(Envelope {
        device,
        attribute: measurement.attribute,
        value,
        occurred_at,
        trace_id: measurement.trace_id,
    })
}

fn timestamp_to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(ts.nanos).ok()?;
    Utc.timestamp_opt(ts.seconds, nanos).single()
}

fn datetime_to_timestamp(dt: &DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

fn measurement_proto(envelope: &Envelope) -> Measurement {
    let value = match &envelope.value {
        PointValue::Int(v) => Value::IntValue(*v),
        PointValue::Float(v) => Value::DoubleValue(*v),
        PointValue::String(v) => Value::StringValue(v.clone()),
        PointValue::Bool(v) => Value::BoolValue(*v),
        PointValue::Bytes(v) => Value::BytesValue(v.clone()),
    };

    Measurement {
        attribute: envelope.attribute.clone(),
        trace_id: envelope.trace_id.clone(),
        timestamp: Some(datetime_to_timestamp(&envelope.occurred_at)),
        value: Some(value),
    }
}

fn device_proto(device: &DeviceDescriptor) -> Device {
    Device {
        tenant_id: device.tenant_id.clone(),
        device_id: device.device_id.clone(),
        raw_id: device.raw_id.clone().unwrap_or_default(),
        tags: device.tags.clone(),
    }
}

pub fn rule_firing_to_proto(firing: &RuleFiring) -> RuleEventMessage {
    RuleEventMessage {
        measurement: Some(measurement_proto(&firing.envelope)),
        device: Some(device_proto(&firing.envelope.device)),
        rule: Some(RuleDescriptor {
            rule_id: firing.rule.rule_id.clone(),
            attribute: firing.rule.attribute.clone(),
            device_tag: firing.rule.device_tag.clone(),
            expression: firing.rule.expression.clone(),
        }),
    }
}

pub fn point_message_from_envelope(envelope: &Envelope) -> PointMessage {
    PointMessage {
        measurement: Some(measurement_proto(envelope)),
        device: Some(device_proto(&envelope.device)),
    }
}
