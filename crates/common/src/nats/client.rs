use crate::nats::trace_context::{TRACEPARENT, TRACESTATE};
use crate::nats::traits::{Delivery, MessageHeaders, Queue, Subscription, PRIMING_PAYLOAD};
use anyhow::{anyhow, Context, Result};
use async_nats::jetstream::{self, consumer::pull, stream::Config as StreamConfig, AckKind};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// JetStream-backed [`Queue`].
///
/// Topic `t` is stream `t` capturing subjects `t.>`. Consumer groups are
/// durable pull consumers with explicit acks.
pub struct NatsQueue {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    requeue_delay: Duration,
}

impl NatsQueue {
    pub async fn connect(url: &str, timeout: Duration, requeue_delay: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self {
            client,
            jetstream,
            requeue_delay,
        })
    }

    pub async fn ensure_stream(&self, stream_name: &str) -> Result<()> {
        debug!(stream = %stream_name, "Ensuring stream exists");

        match self.jetstream.get_stream(stream_name).await {
            Ok(_) => {
                debug!(stream = %stream_name, "Stream already exists");
            }
            Err(_) => {
                let stream_config = StreamConfig {
                    name: stream_name.to_string(),
                    subjects: vec![format!("{}.>", stream_name)],
                    description: Some(format!("fieldline topic {}", stream_name)),
                    ..Default::default()
                };
                self.jetstream
                    .create_stream(stream_config)
                    .await
                    .context("Failed to create stream")?;
                info!(stream = %stream_name, "Created stream");
            }
        }

        Ok(())
    }
}

fn to_header_map(headers: &MessageHeaders) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        map.insert(key.as_str(), value.as_str());
    }
    map
}

fn from_header_map(headers: Option<&HeaderMap>) -> MessageHeaders {
    let mut map = MessageHeaders::new();
    if let Some(headers) = headers {
        for key in [TRACEPARENT, TRACESTATE] {
            if let Some(value) = headers.get(key) {
                map.insert(key.to_string(), value.as_str().to_string());
            }
        }
    }
    map
}

#[async_trait]
impl Queue for NatsQueue {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.publish_with_headers(subject, MessageHeaders::new(), payload)
            .await
    }

    #[instrument(skip(self, headers, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: MessageHeaders,
        payload: Bytes,
    ) -> Result<()> {
        let ack = self
            .jetstream
            .publish_with_headers(subject.to_string(), to_header_map(&headers), payload)
            .await
            .context("Failed to publish message to JetStream")?;

        ack.await
            .context("Failed to receive JetStream acknowledgment")?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Arc<dyn Subscription>> {
        debug!(stream = %topic, consumer = %group, "creating durable pull consumer");

        self.ensure_stream(topic).await?;

        let config = pull::Config {
            name: Some(group.to_string()),
            durable_name: Some(group.to_string()),
            filter_subject: format!("{}.>", topic),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = self
            .jetstream
            .create_consumer_on_stream(config, topic)
            .await
            .context("failed to create consumer")?;

        let messages = consumer
            .messages()
            .await
            .context("failed to open consumer message stream")?;

        info!(stream = %topic, consumer = %group, "subscribed");

        Ok(Arc::new(NatsSubscription {
            topic: topic.to_string(),
            group: group.to_string(),
            messages: Mutex::new(Some(messages)),
            requeue_delay: self.requeue_delay,
        }))
    }

    async fn prime(&self, topic: &str) -> Result<()> {
        self.ensure_stream(topic).await?;
        self.publish(
            &format!("{}.priming", topic),
            Bytes::from_static(PRIMING_PAYLOAD),
        )
        .await
        .context("Failed to publish priming message")?;
        debug!(stream = %topic, "primed topic");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        info!("Closing NATS connection");
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;
        Ok(())
    }
}

/// Durable consumer group shared by the workers of one pool
pub struct NatsSubscription {
    topic: String,
    group: String,
    messages: Mutex<Option<pull::Stream>>,
    requeue_delay: Duration,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next_message(&self) -> Result<Option<Box<dyn Delivery>>> {
        let mut guard = self.messages.lock().await;
        let Some(messages) = guard.as_mut() else {
            return Ok(None);
        };

        match messages.next().await {
            Some(Ok(message)) => Ok(Some(Box::new(NatsDelivery::new(
                message,
                self.requeue_delay,
            )))),
            Some(Err(e)) => Err(anyhow!(
                "failed to receive from {}/{}: {}",
                self.topic,
                self.group,
                e
            )),
            None => Ok(None),
        }
    }

    async fn unsubscribe(&self) -> Result<()> {
        // The durable consumer stays on the server so redeliveries survive restarts.
        self.messages.lock().await.take();
        info!(stream = %self.topic, consumer = %self.group, "unsubscribed");
        Ok(())
    }
}

pub struct NatsDelivery {
    subject: String,
    headers: MessageHeaders,
    message: jetstream::Message,
    requeue_delay: Duration,
}

impl NatsDelivery {
    fn new(message: jetstream::Message, requeue_delay: Duration) -> Self {
        Self {
            subject: message.subject.to_string(),
            headers: from_header_map(message.headers.as_ref()),
            message,
            requeue_delay,
        }
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    async fn ack(&self) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow!("failed to acknowledge message: {}", e))
    }

    async fn requeue(&self) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(Some(self.requeue_delay)))
            .await
            .map_err(|e| anyhow!("failed to requeue message: {}", e))
    }
}
