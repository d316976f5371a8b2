//! Wire schema of the pipeline topics.
//!
//! Field tags are part of the contract with upstream decoders and downstream
//! subscribers; never renumber them.

use prost_types::Timestamp;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Measurement {
    #[prost(string, tag = "1")]
    pub attribute: String,
    #[prost(string, tag = "2")]
    pub trace_id: String,
    #[prost(message, optional, tag = "3")]
    pub timestamp: Option<Timestamp>,
    #[prost(oneof = "measurement::Value", tags = "4, 5, 6, 7, 8")]
    pub value: Option<measurement::Value>,
}

pub mod measurement {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(int64, tag = "4")]
        IntValue(i64),
        #[prost(double, tag = "5")]
        DoubleValue(f64),
        #[prost(string, tag = "6")]
        StringValue(String),
        #[prost(bool, tag = "7")]
        BoolValue(bool),
        #[prost(bytes = "vec", tag = "8")]
        BytesValue(Vec<u8>),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Device {
    #[prost(string, tag = "1")]
    pub tenant_id: String,
    #[prost(string, tag = "2")]
    pub device_id: String,
    /// Empty when the device has no raw radio identifier
    #[prost(string, tag = "3")]
    pub raw_id: String,
    #[prost(string, repeated, tag = "4")]
    pub tags: Vec<String>,
}

/// Input of both pipelines
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PointEnvelope {
    #[prost(message, optional, tag = "1")]
    pub measurement: Option<Measurement>,
    #[prost(message, optional, tag = "2")]
    pub device: Option<Device>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RuleDescriptor {
    #[prost(string, tag = "1")]
    pub rule_id: String,
    #[prost(string, tag = "2")]
    pub attribute: String,
    #[prost(string, tag = "3")]
    pub device_tag: String,
    #[prost(string, tag = "4")]
    pub expression: String,
}

/// Published once per newly recorded rule firing
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RuleEventMessage {
    #[prost(message, optional, tag = "1")]
    pub measurement: Option<Measurement>,
    #[prost(message, optional, tag = "2")]
    pub device: Option<Device>,
    #[prost(message, optional, tag = "3")]
    pub rule: Option<RuleDescriptor>,
}

/// Published once per newly accumulated point
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PointMessage {
    #[prost(message, optional, tag = "1")]
    pub measurement: Option<Measurement>,
    #[prost(message, optional, tag = "2")]
    pub device: Option<Device>,
}
