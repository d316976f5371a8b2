use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use super::publish_types::{PublishRequest, PublishResponse};
use crate::nats::traits::topic_of;
use tower::{Layer, Service};
use tracing::{debug, error, warn, Instrument, Span};

const DEFAULT_SLOW_PUBLISH: Duration = Duration::from_millis(500);

/// Output topic and tenant of a `<topic>.<tenant>` subject
fn output_parts(subject: &str) -> (&str, &str) {
    let topic = topic_of(subject);
    let tenant = subject
        .strip_prefix(topic)
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or_default();
    (topic, tenant)
}

/// Tower layer logging each output publish against its topic and tenant.
///
/// Success is logged at debug, publishes slower than the threshold at warn,
/// failures at error. The record is already durable when a publish fails, so
/// the error line is the only trace of the lost output.
#[derive(Clone)]
pub struct PublishLoggingLayer {
    slow_threshold: Duration,
}

impl Default for PublishLoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishLoggingLayer {
    pub fn new() -> Self {
        Self {
            slow_threshold: DEFAULT_SLOW_PUBLISH,
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }
}

impl<S> Layer<S> for PublishLoggingLayer {
    type Service = PublishLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        PublishLoggingService {
            inner: service,
            slow_threshold: self.slow_threshold,
        }
    }
}

#[derive(Clone)]
pub struct PublishLoggingService<S> {
    inner: S,
    slow_threshold: Duration,
}

impl<S> Service<PublishRequest> for PublishLoggingService<S>
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

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let subject = req.subject.clone();
        let payload_bytes = req.payload.len();
        let slow_threshold = self.slow_threshold;
        let start = Instant::now();
        let mut inner = self.inner.clone();

        // Caller's span carries trace, tenant and device ids
        let span = Span::current();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let elapsed = start.elapsed();
                let duration_ms = elapsed.as_millis() as u64;
                let (topic, tenant) = output_parts(&subject);

                match &result {
                    Ok(_) if elapsed > slow_threshold => warn!(
                        output_topic = topic,
                        output_tenant = tenant,
                        payload_bytes,
                        duration_ms,
                        threshold_ms = slow_threshold.as_millis() as u64,
                        "slow output publish"
                    ),
                    Ok(_) => debug!(
                        output_topic = topic,
                        output_tenant = tenant,
                        payload_bytes,
                        duration_ms,
                        "output published"
                    ),
                    Err(e) => error!(
                        output_topic = topic,
                        output_tenant = tenant,
                        subject = %subject,
                        payload_bytes,
                        duration_ms,
                        error = %e,
                        "output publish failed, record kept without downstream message"
                    ),
                }

                result
            }
            .instrument(span),
        )
    }
}
