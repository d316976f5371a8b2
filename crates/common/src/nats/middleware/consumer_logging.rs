use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::nats::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{debug, error, warn, Instrument, Span};

/// Tower layer logging the outcome and latency of each consumed message
#[derive(Clone, Default)]
pub struct ConsumeLoggingLayer;

impl ConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ConsumeLoggingLayer {
    type Service = ConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ConsumeLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct ConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for ConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject.clone();
        let payload_size = req.payload.len();
        let start = Instant::now();
        let mut inner = self.inner.clone();

        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(ConsumeResponse::Ack) => {
                        debug!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            "consumed from {subject} in {duration_ms}ms [ack]"
                        );
                    }
                    Ok(ConsumeResponse::Requeue(reason)) => {
                        warn!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            reason = reason.as_deref().unwrap_or("unspecified"),
                            "consumed from {subject} in {duration_ms}ms [requeue]"
                        );
                    }
                    Err(e) => {
                        error!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to consume from {subject} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MessageHeaders;
    use bytes::Bytes;
    use tower::{service_fn, ServiceExt};

    #[tokio::test]
    async fn test_logging_layer_passes_response_through() {
        let inner = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::requeue("store unavailable"))
        });
        let svc = ConsumeLoggingLayer::new().layer(inner);

        let response = svc
            .oneshot(ConsumeRequest::new(
                "envelopes.t1",
                Bytes::from_static(b"x"),
                MessageHeaders::new(),
            ))
            .await
            .unwrap();

        assert!(response.is_requeue());
    }
}
