use bytes::Bytes;
use common::domain::PointValue;
use common::memory::{InMemoryPointRepository, InMemoryQueue};
use common::nats::{Queue, PRIMING_PAYLOAD};
use common::pipeline_metrics::{CountingMetrics, EmitOutcome, MessageOutcome};
use common::proto::{measurement, Device, Measurement, PointEnvelope, PointMessage};
use point_worker::{PointWorker, PointWorkerConfig};
use prost::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    queue: InMemoryQueue,
    points: InMemoryPointRepository,
    metrics: Arc<CountingMetrics>,
    ctx: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    async fn start() -> Self {
        let queue = InMemoryQueue::new();
        let points = InMemoryPointRepository::new();
        let metrics = Arc::new(CountingMetrics::new());

        let worker = PointWorker::new(
            Arc::new(queue.clone()),
            Arc::new(points.clone()),
            metrics.clone(),
            PointWorkerConfig {
                workers: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let ctx = CancellationToken::new();
        let handle = tokio::spawn(worker.run(ctx.clone()));

        Self {
            queue,
            points,
            metrics,
            ctx,
            handle,
        }
    }

    async fn publish(&self, envelope: PointEnvelope) {
        self.queue
            .publish("envelopes.tenant-x", envelope.encode_to_vec().into())
            .await
            .unwrap();
    }

    async fn settle(&self, count: usize) {
        assert!(self.queue.wait_for_settled(count, SETTLE_TIMEOUT).await);
    }

    fn point_messages(&self) -> Vec<(String, PointMessage)> {
        self.queue
            .published_on("points")
            .into_iter()
            .map(|m| (m.subject, PointMessage::decode(m.payload.as_ref()).unwrap()))
            .collect()
    }

    async fn stop(self) {
        self.ctx.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn point(attribute: &str, value: measurement::Value, nanos: i32) -> PointEnvelope {
    PointEnvelope {
        measurement: Some(Measurement {
            attribute: attribute.to_string(),
            trace_id: "trace-1".to_string(),
            timestamp: Some(prost_types::Timestamp {
                seconds: 1_700_000_000,
                nanos,
            }),
            value: Some(value),
        }),
        device: Some(Device {
            tenant_id: "tenant-x".to_string(),
            device_id: "device-d".to_string(),
            raw_id: "0004a30b001c".to_string(),
            tags: vec![],
        }),
    }
}

#[tokio::test]
async fn test_point_is_stored_once_and_published_once() {
    let harness = Harness::start().await;
    let envelope = point("temperature", measurement::Value::DoubleValue(21.5), 0);

    harness.publish(envelope.clone()).await;
    harness.settle(1).await;
    harness.publish(envelope).await;
    harness.settle(2).await;

    let points = harness.points.points().await;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].attribute, "temperature");
    assert_eq!(points[0].value, PointValue::Float(21.5));

    let messages = harness.point_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "points.tenant-x");
    assert_eq!(
        messages[0].1.device.as_ref().unwrap().raw_id,
        "0004a30b001c"
    );
    assert_eq!(harness.metrics.emits(EmitOutcome::Emitted), 1);
    assert_eq!(harness.metrics.emits(EmitOutcome::Duplicate), 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_distinct_attributes_are_distinct_points() {
    let harness = Harness::start().await;

    harness
        .publish(point("temperature", measurement::Value::DoubleValue(21.5), 0))
        .await;
    harness
        .publish(point("door", measurement::Value::BoolValue(true), 0))
        .await;
    harness.settle(2).await;

    assert_eq!(harness.points.count().await, 2);
    assert_eq!(harness.point_messages().len(), 2);
    harness.stop().await;
}

#[tokio::test]
async fn test_sub_millisecond_readings_collapse() {
    let harness = Harness::start().await;

    harness
        .publish(point("temperature", measurement::Value::IntValue(1), 7_000_001))
        .await;
    harness.settle(1).await;
    harness
        .publish(point("temperature", measurement::Value::IntValue(2), 7_999_000))
        .await;
    harness.settle(2).await;

    let points = harness.points.points().await;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, PointValue::Int(1));
    harness.stop().await;
}

#[tokio::test]
async fn test_oversized_value_is_rejected_and_acked() {
    let harness = Harness::start().await;

    harness
        .publish(point(
            "payload",
            measurement::Value::BytesValue(vec![0u8; 5000]),
            0,
        ))
        .await;
    harness.settle(1).await;

    assert_eq!(harness.queue.acked().len(), 1);
    assert_eq!(harness.points.count().await, 0);
    assert!(harness.point_messages().is_empty());
    assert_eq!(harness.metrics.emits(EmitOutcome::StoreFailed), 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_priming_message_is_discarded() {
    let harness = Harness::start().await;

    harness.queue.prime("envelopes").await.unwrap();
    harness.settle(1).await;

    assert_eq!(harness.queue.acked().len(), 1);
    assert_eq!(harness.queue.acked()[0].payload, Bytes::from_static(PRIMING_PAYLOAD));
    assert_eq!(harness.points.count().await, 0);
    assert_eq!(harness.metrics.messages(MessageOutcome::Priming), 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_envelope_without_timestamp_is_dropped() {
    let harness = Harness::start().await;
    let mut envelope = point("temperature", measurement::Value::IntValue(1), 0);
    if let Some(m) = envelope.measurement.as_mut() {
        m.timestamp = None;
    }

    harness.publish(envelope).await;
    harness.settle(1).await;

    assert_eq!(harness.queue.acked().len(), 1);
    assert_eq!(harness.points.count().await, 0);
    assert_eq!(harness.metrics.messages(MessageOutcome::InvalidEnvelope), 1);
    harness.stop().await;
}
