use async_trait::async_trait;
use common::domain::{
    with_timeout, AccumulatedPointProducer, CreateOutcome, CreatePointInput, DomainResult,
    Envelope, EnvelopeHandler, PointRepository,
};
use common::pipeline_metrics::{EmitOutcome, PipelineMetrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Persists every point once and forwards newly stored points downstream.
///
/// Store and publish failures are point-local: they are logged and metered
/// and the message is still acked.
pub struct PointAccumulationService {
    points: Arc<dyn PointRepository>,
    producer: Arc<dyn AccumulatedPointProducer>,
    metrics: Arc<dyn PipelineMetrics>,
    call_timeout: Duration,
}

impl PointAccumulationService {
    pub fn new(
        points: Arc<dyn PointRepository>,
        producer: Arc<dyn AccumulatedPointProducer>,
        metrics: Arc<dyn PipelineMetrics>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            points,
            producer,
            metrics,
            call_timeout,
        }
    }

    async fn accumulate(&self, envelope: &Envelope) -> EmitOutcome {
        let input = CreatePointInput::from_envelope(envelope);
        match with_timeout(
            "create_point",
            self.call_timeout,
            self.points.create_point(input),
        )
        .await
        {
            Ok(CreateOutcome::Created) => {}
            Ok(CreateOutcome::AlreadyExists) => {
                info!("point already accumulated, skipping publish");
                return EmitOutcome::Duplicate;
            }
            Err(e) => {
                error!(error = %e, "failed to accumulate point");
                return EmitOutcome::StoreFailed;
            }
        }

        match with_timeout(
            "publish_point",
            self.call_timeout,
            self.producer.publish_point(envelope),
        )
        .await
        {
            Ok(()) => {
                debug!("accumulated point published");
                EmitOutcome::Emitted
            }
            Err(e) => {
                error!(error = %e, "failed to publish accumulated point");
                EmitOutcome::PublishFailed
            }
        }
    }
}

#[async_trait]
impl EnvelopeHandler for PointAccumulationService {
    #[instrument(skip_all, fields(attribute = %envelope.attribute, value_kind = envelope.value.kind()))]
    async fn handle(&self, envelope: Envelope) -> DomainResult<()> {
        let outcome = self.accumulate(&envelope).await;
        self.metrics.record_emit(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike, Utc};
    use common::domain::{
        DeviceDescriptor, DomainError, MockAccumulatedPointProducer, MockPointRepository,
        PointValue,
    };
    use common::pipeline_metrics::CountingMetrics;

    fn envelope() -> Envelope {
        Envelope {
            device: DeviceDescriptor {
                tenant_id: "tenant-x".to_string(),
                device_id: "device-d".to_string(),
                raw_id: Some("0004a30b001c".to_string()),
                tags: vec![],
            },
            attribute: "temperature".to_string(),
            value: PointValue::Float(21.5),
            occurred_at: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
            trace_id: "trace-1".to_string(),
        }
    }

    fn service(
        points: MockPointRepository,
        producer: MockAccumulatedPointProducer,
    ) -> (PointAccumulationService, Arc<CountingMetrics>) {
        let metrics = Arc::new(CountingMetrics::new());
        let service = PointAccumulationService::new(
            Arc::new(points),
            Arc::new(producer),
            metrics.clone(),
            Duration::from_secs(1),
        );
        (service, metrics)
    }

    #[tokio::test]
    async fn test_new_point_is_stored_and_published() {
        let mut points = MockPointRepository::new();
        points
            .expect_create_point()
            .withf(|input| {
                input.attribute == "temperature"
                    && input.value == PointValue::Float(21.5)
                    && input.occurred_at.nanosecond() == 123_000_000
            })
            .times(1)
            .returning(|_| Ok(CreateOutcome::Created));
        let mut producer = MockAccumulatedPointProducer::new();
        producer
            .expect_publish_point()
            .withf(|envelope| envelope.device_id() == "device-d")
            .times(1)
            .returning(|_| Ok(()));

        let (service, metrics) = service(points, producer);
        service.handle(envelope()).await.unwrap();

        assert_eq!(metrics.emits(EmitOutcome::Emitted), 1);
    }

    #[tokio::test]
    async fn test_duplicate_point_is_not_published() {
        let mut points = MockPointRepository::new();
        points
            .expect_create_point()
            .returning(|_| Ok(CreateOutcome::AlreadyExists));
        let mut producer = MockAccumulatedPointProducer::new();
        producer.expect_publish_point().times(0);

        let (service, metrics) = service(points, producer);
        service.handle(envelope()).await.unwrap();

        assert_eq!(metrics.emits(EmitOutcome::Duplicate), 1);
    }

    #[tokio::test]
    async fn test_invalid_point_is_acked() {
        let mut points = MockPointRepository::new();
        points.expect_create_point().returning(|_| {
            Err(DomainError::InvalidFormat(
                "binary value of 5000 bytes exceeds 4096 bytes".to_string(),
            ))
        });
        let mut producer = MockAccumulatedPointProducer::new();
        producer.expect_publish_point().times(0);

        let (service, metrics) = service(points, producer);

        assert!(service.handle(envelope()).await.is_ok());
        assert_eq!(metrics.emits(EmitOutcome::StoreFailed), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_logged_and_acked() {
        let mut points = MockPointRepository::new();
        points
            .expect_create_point()
            .returning(|_| Ok(CreateOutcome::Created));
        let mut producer = MockAccumulatedPointProducer::new();
        producer
            .expect_publish_point()
            .returning(|_| Err(DomainError::PublishError("timeout".to_string())));

        let (service, metrics) = service(points, producer);

        assert!(service.handle(envelope()).await.is_ok());
        assert_eq!(metrics.emits(EmitOutcome::PublishFailed), 1);
    }
}
