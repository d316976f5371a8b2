use crate::nats::traits::MessageHeaders;
use bytes::Bytes;

/// Request type for consuming a single message through Tower.
///
/// Owns the message data so it can pass through middleware layers without
/// borrowing the delivery.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Used for trace context propagation
    pub headers: MessageHeaders,
}

impl ConsumeRequest {
    pub fn new(subject: impl Into<String>, payload: Bytes, headers: MessageHeaders) -> Self {
        Self {
            subject: subject.into(),
            payload,
            headers,
        }
    }
}

/// Whether the delivery should be acknowledged or handed back for redelivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    Ack,
    Requeue(Option<String>),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn requeue(reason: impl Into<String>) -> Self {
        Self::Requeue(Some(reason.into()))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_requeue(&self) -> bool {
        matches!(self, Self::Requeue(_))
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Requeue(_) => "requeue",
        }
    }
}
