use crate::nats::traits::MessageHeaders;
use bytes::Bytes;

/// Request to publish a message through the queue
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Trace context is injected here by the tracing layer
    pub headers: MessageHeaders,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: MessageHeaders::new(),
        }
    }

    pub fn with_headers(mut self, headers: MessageHeaders) -> Self {
        self.headers = headers;
        self
    }
}

#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}
