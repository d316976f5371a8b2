use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Typed measurement value. Exactly one variant is carried per point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl PointValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PointValue::Int(_) => "int",
            PointValue::Float(_) => "float",
            PointValue::String(_) => "string",
            PointValue::Bool(_) => "bool",
            PointValue::Bytes(_) => "bytes",
        }
    }
}

/// Device context attached to an envelope by the upstream decoder
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceDescriptor {
    pub tenant_id: String,
    /// Synthetic (logical) device identifier
    pub device_id: String,
    /// Raw radio identifier, e.g. a DevEUI
    pub raw_id: Option<String>,
    pub tags: Vec<String>,
}

impl DeviceDescriptor {
    /// Logical key used in dedup tuples: the synthetic ID, or the raw ID when
    /// no synthetic ID was assigned.
    pub fn logical_id(&self) -> Option<&str> {
        if !self.device_id.is_empty() {
            return Some(&self.device_id);
        }
        self.raw_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// A decoded measurement plus device context traveling through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub device: DeviceDescriptor,
    pub attribute: String,
    pub value: PointValue,
    pub occurred_at: DateTime<Utc>,
    pub trace_id: String,
}

impl Envelope {
    pub fn tenant_id(&self) -> &str {
        &self.device.tenant_id
    }

    /// Logical device ID; envelopes are only constructed once this is known.
    pub fn device_id(&self) -> &str {
        self.device.logical_id().unwrap_or_default()
    }
}

/// Pipeline stage invoked once per decoded envelope.
///
/// `Err` means an input-side failure that may succeed on redelivery; the
/// message is requeued. Output-side failures are handled inside the stage and
/// reported as `Ok`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> DomainResult<()>;
}
