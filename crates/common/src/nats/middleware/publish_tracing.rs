use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::publish_types::{PublishRequest, PublishResponse};
use crate::nats::trace_context::inject_trace_context;
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument};

/// Tower layer opening a `publish` span and injecting its context into the
/// outgoing headers
#[derive(Clone)]
pub struct PublishTracingLayer {
    service_name: String,
}

impl PublishTracingLayer {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl<S> Layer<S> for PublishTracingLayer {
    type Service = PublishTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        PublishTracingService {
            inner: service,
            service_name: self.service_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PublishTracingService<S> {
    inner: S,
    service_name: String,
}

impl<S> Service<PublishRequest> for PublishTracingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: PublishRequest) -> Self::Future {
        let span = info_span!(
            target: "nats",
            "nats_publish",
            otel.name = "nats_publish",
            messaging.system = "nats",
            messaging.operation = "publish",
            messaging.destination.name = %req.subject,
            messaging.message.body.size = req.payload.len(),
            service.name = %self.service_name,
            otel.status_code = field::Empty,
        );

        // Headers carry the publish span, not the caller's span
        {
            let _entered = span.enter();
            inject_trace_context(&mut req.headers);
        }

        let mut inner = self.inner.clone();
        let record_span = span.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let status = if result.is_ok() { "OK" } else { "ERROR" };
                record_span.record("otel.status_code", status);
                result
            }
            .instrument(span),
        )
    }
}
