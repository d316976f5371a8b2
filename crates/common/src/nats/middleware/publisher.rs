use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::publish_types::{PublishRequest, PublishResponse};
use super::{PublishLoggingLayer, PublishLoggingService, PublishTracingLayer, PublishTracingService};
use crate::nats::Queue;
use anyhow::Result;
use tower::{Service, ServiceBuilder, ServiceExt};

/// Innermost service: hands the request to the queue
#[derive(Clone)]
pub struct QueuePublishService {
    queue: Arc<dyn Queue>,
}

impl QueuePublishService {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self { queue }
    }
}

impl Service<PublishRequest> for QueuePublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let queue = Arc::clone(&self.queue);

        Box::pin(async move {
            queue
                .publish_with_headers(&req.subject, req.headers, req.payload)
                .await?;
            Ok(PublishResponse {
                subject: req.subject,
            })
        })
    }
}

/// Publish stack used by the producers.
///
/// Layer order (outermost first): tracing -> logging -> queue.
#[derive(Clone)]
pub struct LayeredPublisher {
    inner: PublishTracingService<PublishLoggingService<QueuePublishService>>,
}

impl LayeredPublisher {
    pub fn new(queue: Arc<dyn Queue>, service_name: impl Into<String>) -> Self {
        let inner = ServiceBuilder::new()
            .layer(PublishTracingLayer::new(service_name))
            .layer(PublishLoggingLayer::new())
            .service(QueuePublishService::new(queue));
        Self { inner }
    }

    pub async fn publish(&self, request: PublishRequest) -> Result<PublishResponse> {
        self.inner.clone().oneshot(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MockQueue;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_publisher_forwards_subject_and_payload() {
        let mut queue = MockQueue::new();
        queue
            .expect_publish_with_headers()
            .withf(|subject: &str, _headers, payload: &Bytes| {
                subject == "rule_events.tenant-x" && payload.as_ref() == b"encoded"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let publisher = LayeredPublisher::new(Arc::new(queue), "test_producer");
        let response = publisher
            .publish(PublishRequest::new(
                "rule_events.tenant-x",
                Bytes::from_static(b"encoded"),
            ))
            .await
            .unwrap();

        assert_eq!(response.subject, "rule_events.tenant-x");
    }

    #[tokio::test]
    async fn test_publisher_surfaces_queue_error() {
        let mut queue = MockQueue::new();
        queue
            .expect_publish_with_headers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("broker unavailable")));

        let publisher = LayeredPublisher::new(Arc::new(queue), "test_producer");
        let result = publisher
            .publish(PublishRequest::new("points.t1", Bytes::new()))
            .await;

        assert!(result.is_err());
    }
}
