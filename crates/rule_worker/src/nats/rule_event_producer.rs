use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, RuleEventProducer, RuleFiring};
use common::nats::{tenant_subject, LayeredPublisher, PublishRequest, Queue};
use common::proto::rule_firing_to_proto;
use prost::Message;
use std::sync::Arc;
use tracing::debug;

/// Publishes `RuleEventMessage`s to `<output_topic>.<tenant_id>`
pub struct NatsRuleEventProducer {
    publisher: LayeredPublisher,
    output_topic: String,
}

impl NatsRuleEventProducer {
    pub fn new(queue: Arc<dyn Queue>, output_topic: impl Into<String>) -> Self {
        let output_topic = output_topic.into();
        debug!(output_topic = %output_topic, "initialized rule event producer");

        Self {
            publisher: LayeredPublisher::new(queue, "rule_event_producer"),
            output_topic,
        }
    }
}

#[async_trait]
impl RuleEventProducer for NatsRuleEventProducer {
    async fn publish_rule_event(&self, firing: &RuleFiring) -> DomainResult<()> {
        let payload = rule_firing_to_proto(firing).encode_to_vec();
        let subject = tenant_subject(&self.output_topic, firing.envelope.tenant_id());

        self.publisher
            .publish(PublishRequest::new(subject, payload))
            .await
            .map_err(|e| DomainError::PublishError(e.to_string()))?;

        Ok(())
    }
}
