use async_trait::async_trait;
use common::domain::{AccumulatedPointProducer, DomainError, DomainResult, Envelope};
use common::nats::{tenant_subject, LayeredPublisher, PublishRequest, Queue};
use common::proto::point_message_from_envelope;
use prost::Message;
use std::sync::Arc;
use tracing::debug;

/// Publishes `PointMessage`s to `<output_topic>.<tenant_id>`
pub struct NatsPointProducer {
    publisher: LayeredPublisher,
    output_topic: String,
}

impl NatsPointProducer {
    pub fn new(queue: Arc<dyn Queue>, output_topic: impl Into<String>) -> Self {
        let output_topic = output_topic.into();
        debug!(output_topic = %output_topic, "initialized point producer");

        Self {
            publisher: LayeredPublisher::new(queue, "point_producer"),
            output_topic,
        }
    }
}

#[async_trait]
impl AccumulatedPointProducer for NatsPointProducer {
    async fn publish_point(&self, envelope: &Envelope) -> DomainResult<()> {
        let payload = point_message_from_envelope(envelope).encode_to_vec();
        let subject = tenant_subject(&self.output_topic, envelope.tenant_id());

        self.publisher
            .publish(PublishRequest::new(subject, payload))
            .await
            .map_err(|e| DomainError::PublishError(e.to_string()))?;

        Ok(())
    }
}
