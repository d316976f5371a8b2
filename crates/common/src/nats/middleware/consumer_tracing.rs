use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::nats::trace_context::set_parent_from_headers;
use crate::nats::traits::topic_of;
use crate::nats::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument};

/// Tower layer opening a `receive` span per message, parented on the
/// publisher's trace context when the message carries one
#[derive(Clone)]
pub struct ConsumeTracingLayer {
    consumer_group: String,
}

impl ConsumeTracingLayer {
    pub fn new(consumer_group: impl Into<String>) -> Self {
        Self {
            consumer_group: consumer_group.into(),
        }
    }
}

impl<S> Layer<S> for ConsumeTracingLayer {
    type Service = ConsumeTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        ConsumeTracingService {
            inner: service,
            consumer_group: self.consumer_group.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ConsumeTracingService<S> {
    inner: S,
    consumer_group: String,
}

impl<S> Service<ConsumeRequest> for ConsumeTracingService<S>
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
        let span = info_span!(
            target: "nats",
            "nats_consume",
            otel.name = "nats_consume",
            messaging.system = "nats",
            messaging.operation = "receive",
            messaging.destination.name = %topic_of(&req.subject),
            messaging.consumer.name = %self.consumer_group,
            messaging.message.body.size = req.payload.len(),
            otel.status_code = field::Empty,
        );
        set_parent_from_headers(&span, &req.headers);

        let mut inner = self.inner.clone();
        let record_span = span.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;

                match &result {
                    Ok(ConsumeResponse::Ack) => {
                        record_span.record("otel.status_code", "OK");
                    }
                    Ok(ConsumeResponse::Requeue(_)) | Err(_) => {
                        record_span.record("otel.status_code", "ERROR");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
