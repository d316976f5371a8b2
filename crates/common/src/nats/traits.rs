use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Payload of the priming message published by [`Queue::prime`].
///
/// Consumers must ack it silently; it is never a decode failure.
pub const PRIMING_PAYLOAD: &[u8] = b"__fieldline_priming__";

/// Message headers carried alongside a payload (W3C trace context)
pub type MessageHeaders = HashMap<String, String>;

/// Broker client used by the pipelines.
///
/// A topic `t` owns every subject below it (`t.>`); producers publish to
/// `t.<suffix>` and consumer groups subscribe to the whole topic.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Queue: Send + Sync {
    /// At-least-once send. An error is transient for the caller.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: MessageHeaders,
        payload: Bytes,
    ) -> Result<()>;

    /// Join the durable consumer group `group` on `topic`
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Arc<dyn Subscription>>;

    /// Make sure `topic` exists and publish one [`PRIMING_PAYLOAD`] message to it
    async fn prime(&self, topic: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Handle on a consumer group. Shared by every worker of a pool.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Wait for the next delivery. `None` once the subscription is closed.
    async fn next_message(&self) -> Result<Option<Box<dyn Delivery>>>;

    async fn unsubscribe(&self) -> Result<()>;
}

/// One delivery of a message. Terminal in exactly one `ack` or `requeue`.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn subject(&self) -> &str;

    fn payload(&self) -> &Bytes;

    fn headers(&self) -> &MessageHeaders;

    /// Remove the message permanently
    async fn ack(&self) -> Result<()>;

    /// Make the message redeliverable after the subscription's requeue delay
    async fn requeue(&self) -> Result<()>;
}

/// Stream name owning `subject`: everything before the first `.`
pub fn topic_of(subject: &str) -> &str {
    subject.split('.').next().unwrap_or(subject)
}

/// Whether `token` can stand as one subject token: non-empty, with no
/// separator, wildcard, whitespace or control character.
pub fn is_subject_token(token: &str) -> bool {
    !token.is_empty()
        && !token
            .chars()
            .any(|c| matches!(c, '.' | '*' | '>') || c.is_whitespace() || c.is_control())
}

/// Subject a pipeline publishes its output for `tenant_id` on.
///
/// `tenant_id` must satisfy [`is_subject_token`]; decoding rejects envelopes
/// whose tenant does not.
pub fn tenant_subject(topic: &str, tenant_id: &str) -> String {
    format!("{}.{}", topic, tenant_id)
}
