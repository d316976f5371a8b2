use crate::nats::{ConsumeRequest, ConsumeResponse, Delivery, Subscription};
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    /// How long in-flight messages may run after cancellation before the
    /// remaining workers are aborted
    pub shutdown_grace_period: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            shutdown_grace_period: Duration::from_secs(10),
        }
    }
}

/// Fixed-size pool of consumers sharing one subscription.
///
/// Every worker receives, runs the Tower service, then acks or requeues. The
/// subscription is the only coordination between workers.
pub struct WorkerPool<S> {
    name: String,
    subscription: Arc<dyn Subscription>,
    service: S,
    config: WorkerPoolConfig,
}

impl<S> WorkerPool<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        subscription: Arc<dyn Subscription>,
        service: S,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            name: name.into(),
            subscription,
            service,
            config,
        }
    }

    /// Run until `ctx` is cancelled or the subscription closes.
    ///
    /// On cancellation no new message is received; in-flight messages get
    /// `shutdown_grace_period` to settle before their workers are aborted.
    /// A worker task that dies stops the remaining workers the same way and
    /// the pool returns an error.
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        let workers = self.config.workers.max(1);
        info!(pool = %self.name, workers, "starting worker pool");

        let workers_ctx = ctx.child_token();
        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            tasks.spawn(worker_loop(
                self.name.clone(),
                worker_id,
                Arc::clone(&self.subscription),
                self.service.clone(),
                workers_ctx.clone(),
            ));
        }

        let mut failure = None;
        let all_exited = loop {
            tokio::select! {
                _ = ctx.cancelled() => break false,
                joined = tasks.join_next() => match joined {
                    Some(Err(e)) => {
                        error!(pool = %self.name, error = %e, "worker task failed, stopping pool");
                        failure = Some(anyhow!("worker of pool {} failed: {}", self.name, e));
                        workers_ctx.cancel();
                        break false;
                    }
                    Some(Ok(())) => {}
                    None => break true,
                },
            }
        };

        if all_exited {
            info!(pool = %self.name, "all workers exited");
            return Ok(());
        }

        info!(
            pool = %self.name,
            grace_ms = self.config.shutdown_grace_period.as_millis(),
            "draining in-flight messages"
        );
        let drained = tokio::time::timeout(self.config.shutdown_grace_period, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                pool = %self.name,
                remaining = tasks.len(),
                "grace period elapsed, aborting workers"
            );
            tasks.shutdown().await;
        }

        info!(pool = %self.name, "worker pool stopped");
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn worker_loop<S>(
    pool: String,
    worker_id: usize,
    subscription: Arc<dyn Subscription>,
    service: S,
    ctx: CancellationToken,
) where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    debug!(pool = %pool, worker_id, "worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            next = subscription.next_message() => next,
        };

        match next {
            Ok(Some(delivery)) => process_delivery(delivery, service.clone()).await,
            Ok(None) => {
                info!(pool = %pool, worker_id, "subscription closed");
                break;
            }
            Err(e) => {
                error!(pool = %pool, worker_id, error = %e, "failed to receive message");
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    debug!(pool = %pool, worker_id, "worker stopped");
}

async fn process_delivery<S>(delivery: Box<dyn Delivery>, service: S)
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>,
{
    let request = ConsumeRequest::new(
        delivery.subject(),
        delivery.payload().clone(),
        delivery.headers().clone(),
    );

    let response = match AssertUnwindSafe(service.oneshot(request))
        .catch_unwind()
        .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!(subject = %delivery.subject(), error = %e, "service error processing message");
            ConsumeResponse::requeue(e.to_string())
        }
        Err(_) => {
            error!(subject = %delivery.subject(), "service panicked processing message");
            ConsumeResponse::requeue("service panicked")
        }
    };

    match response {
        ConsumeResponse::Ack => {
            if let Err(e) = delivery.ack().await {
                error!(subject = %delivery.subject(), error = %e, "failed to acknowledge message");
            }
        }
        ConsumeResponse::Requeue(_) => {
            if let Err(e) = delivery.requeue().await {
                error!(subject = %delivery.subject(), error = %e, "failed to requeue message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueue;
    use crate::nats::Queue;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    /// Acks payload "ok", requeues everything else once then acks it
    #[derive(Clone, Default)]
    struct RecordingService {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl Service<ConsumeRequest> for RecordingService {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: ConsumeRequest) -> Self::Future {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                if req.payload.as_ref() == b"ok" || call > 0 {
                    Ok(ConsumeResponse::Ack)
                } else {
                    Ok(ConsumeResponse::requeue("first attempt"))
                }
            })
        }
    }

    fn config(workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers,
            shutdown_grace_period: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_pool_acks_every_message() {
        let queue = InMemoryQueue::new();
        let subscription = queue.subscribe("envelopes", "rules").await.unwrap();
        for _ in 0..10 {
            queue
                .publish("envelopes.t1", Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }

        let ctx = CancellationToken::new();
        let service = RecordingService::default();
        let pool = WorkerPool::new("test", subscription, service.clone(), config(3));
        let handle = tokio::spawn(pool.run(ctx.clone()));

        assert!(queue.wait_for_settled(10, Duration::from_secs(2)).await);
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.acked().len(), 10);
        assert!(queue.requeued().is_empty());
        assert_eq!(service.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_requeued_message_is_redelivered() {
        let queue = InMemoryQueue::new();
        let subscription = queue.subscribe("envelopes", "rules").await.unwrap();
        queue
            .publish("envelopes.t1", Bytes::from_static(b"retry"))
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let pool = WorkerPool::new(
            "test",
            subscription,
            RecordingService::default(),
            config(1),
        );
        let handle = tokio::spawn(pool.run(ctx.clone()));

        assert!(queue.wait_for_settled(2, Duration::from_secs(2)).await);
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.requeued().len(), 1);
        assert_eq!(queue.acked().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_message_finish() {
        let queue = InMemoryQueue::new();
        let subscription = queue.subscribe("envelopes", "rules").await.unwrap();
        queue
            .publish("envelopes.t1", Bytes::from_static(b"ok"))
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let service = RecordingService {
            delay: Duration::from_millis(200),
            ..Default::default()
        };
        let calls = Arc::clone(&service.calls);
        let pool = WorkerPool::new("test", subscription, service, config(1));
        let handle = tokio::spawn(pool.run(ctx.clone()));

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(queue.acked().len(), 1);
    }

    #[tokio::test]
    async fn test_grace_period_bounds_shutdown() {
        let queue = InMemoryQueue::new();
        let subscription = queue.subscribe("envelopes", "rules").await.unwrap();
        queue
            .publish("envelopes.t1", Bytes::from_static(b"ok"))
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let service = RecordingService {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let calls = Arc::clone(&service.calls);
        let pool = WorkerPool::new(
            "test",
            subscription,
            service,
            WorkerPoolConfig {
                workers: 1,
                shutdown_grace_period: Duration::from_millis(50),
            },
        );
        let handle = tokio::spawn(pool.run(ctx.clone()));

        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert!(queue.acked().is_empty());
    }

    #[tokio::test]
    async fn test_pool_exits_when_subscription_closes() {
        let queue = InMemoryQueue::new();
        let subscription = queue.subscribe("envelopes", "rules").await.unwrap();
        subscription.unsubscribe().await.unwrap();

        let pool = WorkerPool::new(
            "test",
            subscription,
            RecordingService::default(),
            config(2),
        );

        tokio::time::timeout(Duration::from_secs(1), pool.run(CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();
    }

    /// Panics on payload "boom", acks everything else
    #[derive(Clone)]
    struct PanickingService;

    impl Service<ConsumeRequest> for PanickingService {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: ConsumeRequest) -> Self::Future {
            Box::pin(async move {
                if req.payload.as_ref() == b"boom" {
                    panic!("attempt to divide by zero");
                }
                Ok(ConsumeResponse::Ack)
            })
        }
    }

    struct BrokenSubscription;

    #[async_trait::async_trait]
    impl Subscription for BrokenSubscription {
        async fn next_message(&self) -> Result<Option<Box<dyn Delivery>>> {
            panic!("consumer stream state corrupted");
        }

        async fn unsubscribe(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_service_still_settles_delivery() {
        let queue = InMemoryQueue::new().with_requeue_delay(Duration::from_millis(50));
        let subscription = queue.subscribe("envelopes", "rules").await.unwrap();
        queue
            .publish("envelopes.t1", Bytes::from_static(b"boom"))
            .await
            .unwrap();
        queue
            .publish("envelopes.t1", Bytes::from_static(b"ok"))
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let pool = WorkerPool::new("test", subscription, PanickingService, config(1));
        let handle = tokio::spawn(pool.run(ctx.clone()));

        assert!(queue.wait_for_settled(2, Duration::from_secs(2)).await);
        ctx.cancel();
        handle.await.unwrap().unwrap();

        assert!(!queue.requeued().is_empty());
        assert!(queue.requeued().iter().all(|m| m.payload.as_ref() == b"boom"));
        assert!(queue.acked().iter().any(|m| m.payload.as_ref() == b"ok"));
    }

    #[tokio::test]
    async fn test_dead_worker_fails_the_pool() {
        let pool = WorkerPool::new(
            "test",
            Arc::new(BrokenSubscription),
            RecordingService::default(),
            config(3),
        );

        let result = tokio::time::timeout(Duration::from_secs(2), pool.run(CancellationToken::new()))
            .await
            .unwrap();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("pool test failed"));
    }
}
