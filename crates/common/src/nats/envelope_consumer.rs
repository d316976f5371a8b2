use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::domain::EnvelopeHandler;
use crate::nats::{
    ConsumeLoggingLayer, ConsumeLoggingService, ConsumeRequest, ConsumeResponse,
    ConsumeTracingLayer, ConsumeTracingService, PRIMING_PAYLOAD,
};
use crate::pipeline_metrics::{MessageOutcome, PipelineMetrics};
use crate::proto::{decode_envelope, EnvelopeDecodeError};
use tower::{Service, ServiceBuilder};
use tracing::{debug, error, info_span, warn, Instrument};

/// Tower service turning one delivery into an ack or a requeue.
///
/// Priming messages and undecodable or incomplete payloads are acked without
/// reaching the handler. A decoded envelope runs inside a span carrying its
/// trace, tenant and device ids; a handler error requeues the message.
#[derive(Clone)]
pub struct EnvelopeConsumerService {
    handler: Arc<dyn EnvelopeHandler>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl EnvelopeConsumerService {
    pub fn new(handler: Arc<dyn EnvelopeHandler>, metrics: Arc<dyn PipelineMetrics>) -> Self {
        Self { handler, metrics }
    }
}

impl Service<ConsumeRequest> for EnvelopeConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        let metrics = Arc::clone(&self.metrics);

        if req.payload.as_ref() == PRIMING_PAYLOAD {
            return Box::pin(async move {
                debug!(subject = %req.subject, "discarding priming message");
                metrics.record_message(MessageOutcome::Priming);
                Ok(ConsumeResponse::Ack)
            });
        }

        let envelope = match decode_envelope(&req.payload) {
            Ok(envelope) => envelope,
            Err(EnvelopeDecodeError::Malformed(e)) => {
                return Box::pin(async move {
                    error!(subject = %req.subject, error = %e, "dropping undecodable message");
                    metrics.record_message(MessageOutcome::DecodeFailed);
                    Ok(ConsumeResponse::Ack)
                });
            }
            Err(e @ EnvelopeDecodeError::Invalid(_)) => {
                return Box::pin(async move {
                    warn!(subject = %req.subject, error = %e, "dropping incomplete envelope");
                    metrics.record_message(MessageOutcome::InvalidEnvelope);
                    Ok(ConsumeResponse::Ack)
                });
            }
        };

        let span = info_span!(
            "process_envelope",
            trace_id = %envelope.trace_id,
            tenant_id = %envelope.tenant_id(),
            device_id = %envelope.device_id(),
            attribute = %envelope.attribute,
        );

        Box::pin(
            async move {
                match handler.handle(envelope).await {
                    Ok(()) => {
                        metrics.record_message(MessageOutcome::Acked);
                        Ok(ConsumeResponse::Ack)
                    }
                    Err(e) => {
                        warn!(error = %e, "envelope handling failed, requeueing");
                        metrics.record_message(MessageOutcome::Requeued);
                        Ok(ConsumeResponse::requeue(e.to_string()))
                    }
                }
            }
            .instrument(span),
        )
    }
}

/// Full consume stack (outermost first): tracing -> logging -> envelope handling
pub type EnvelopeConsumerStack =
    ConsumeTracingService<ConsumeLoggingService<EnvelopeConsumerService>>;

pub fn envelope_consumer_stack(
    consumer_group: &str,
    handler: Arc<dyn EnvelopeHandler>,
    metrics: Arc<dyn PipelineMetrics>,
) -> EnvelopeConsumerStack {
    ServiceBuilder::new()
        .layer(ConsumeTracingLayer::new(consumer_group))
        .layer(ConsumeLoggingLayer::new())
        .service(EnvelopeConsumerService::new(handler, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainError, MockEnvelopeHandler};
    use crate::nats::MessageHeaders;
    use crate::pipeline_metrics::CountingMetrics;
    use crate::proto::{measurement, Device, Measurement, PointEnvelope};
    use bytes::Bytes;
    use prost::Message;
    use tower::ServiceExt;

    fn request(payload: impl Into<Bytes>) -> ConsumeRequest {
        ConsumeRequest::new("envelopes.tenant-1", payload.into(), MessageHeaders::new())
    }

    fn envelope_payload() -> Vec<u8> {
        PointEnvelope {
            measurement: Some(Measurement {
                attribute: "motion".to_string(),
                trace_id: "trace-1".to_string(),
                timestamp: Some(prost_types::Timestamp {
                    seconds: 1_700_000_000,
                    nanos: 0,
                }),
                value: Some(measurement::Value::IntValue(123)),
            }),
            device: Some(Device {
                tenant_id: "tenant-1".to_string(),
                device_id: "device-1".to_string(),
                raw_id: String::new(),
                tags: vec!["motion".to_string()],
            }),
        }
        .encode_to_vec()
    }

    fn service(
        handler: MockEnvelopeHandler,
    ) -> (EnvelopeConsumerStack, Arc<CountingMetrics>) {
        let metrics = Arc::new(CountingMetrics::new());
        let svc = envelope_consumer_stack("rules", Arc::new(handler), metrics.clone());
        (svc, metrics)
    }

    #[tokio::test]
    async fn test_priming_message_acked_without_handler() {
        let mut handler = MockEnvelopeHandler::new();
        handler.expect_handle().times(0);
        let (svc, metrics) = service(handler);

        let response = svc
            .oneshot(request(Bytes::from_static(PRIMING_PAYLOAD)))
            .await
            .unwrap();

        assert_eq!(response, ConsumeResponse::Ack);
        assert_eq!(metrics.messages(MessageOutcome::Priming), 1);
    }

    #[tokio::test]
    async fn test_undecodable_message_acked_and_dropped() {
        let mut handler = MockEnvelopeHandler::new();
        handler.expect_handle().times(0);
        let (svc, metrics) = service(handler);

        let response = svc
            .oneshot(request(Bytes::from_static(&[0xff, 0xff, 0xff])))
            .await
            .unwrap();

        assert_eq!(response, ConsumeResponse::Ack);
        assert_eq!(metrics.messages(MessageOutcome::DecodeFailed), 1);
    }

    #[tokio::test]
    async fn test_envelope_without_device_acked_and_dropped() {
        let mut handler = MockEnvelopeHandler::new();
        handler.expect_handle().times(0);
        let (svc, metrics) = service(handler);

        let mut proto = PointEnvelope::decode(envelope_payload().as_slice()).unwrap();
        proto.device = None;

        let response = svc.oneshot(request(proto.encode_to_vec())).await.unwrap();

        assert_eq!(response, ConsumeResponse::Ack);
        assert_eq!(metrics.messages(MessageOutcome::InvalidEnvelope), 1);
    }

    #[tokio::test]
    async fn test_handler_success_acks() {
        let mut handler = MockEnvelopeHandler::new();
        handler
            .expect_handle()
            .withf(|envelope| envelope.device_id() == "device-1" && envelope.attribute == "motion")
            .times(1)
            .returning(|_| Ok(()));
        let (svc, metrics) = service(handler);

        let response = svc.oneshot(request(envelope_payload())).await.unwrap();

        assert_eq!(response, ConsumeResponse::Ack);
        assert_eq!(metrics.messages(MessageOutcome::Acked), 1);
    }

    #[tokio::test]
    async fn test_handler_error_requeues() {
        let mut handler = MockEnvelopeHandler::new();
        handler.expect_handle().times(1).returning(|_| {
            Err(DomainError::RepositoryError(anyhow::anyhow!(
                "connection refused"
            )))
        });
        let (svc, metrics) = service(handler);

        let response = svc.oneshot(request(envelope_payload())).await.unwrap();

        assert!(response.is_requeue());
        assert_eq!(metrics.messages(MessageOutcome::Requeued), 1);
    }
}
