use crate::domain::PointAccumulationService;
use crate::nats::NatsPointProducer;
use common::domain::PointRepository;
use common::nats::{
    envelope_consumer_stack, EnvelopeConsumerStack, Queue, Subscription, WorkerPool,
    WorkerPoolConfig,
};
use common::pipeline_metrics::PipelineMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PointWorkerConfig {
    pub input_topic: String,
    pub consumer_group: String,
    pub output_topic: String,
    pub workers: usize,
    pub shutdown_grace_period: Duration,
    pub call_timeout: Duration,
}

impl Default for PointWorkerConfig {
    fn default() -> Self {
        Self {
            input_topic: "envelopes".to_string(),
            consumer_group: "point_worker".to_string(),
            output_topic: "points".to_string(),
            workers: 4,
            shutdown_grace_period: Duration::from_secs(10),
            call_timeout: Duration::from_secs(3),
        }
    }
}

pub struct PointWorker {
    subscription: Arc<dyn Subscription>,
    pool: WorkerPool<EnvelopeConsumerStack>,
}

impl PointWorker {
    pub async fn new(
        queue: Arc<dyn Queue>,
        points: Arc<dyn PointRepository>,
        metrics: Arc<dyn PipelineMetrics>,
        config: PointWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!(
            input_topic = %config.input_topic,
            consumer_group = %config.consumer_group,
            output_topic = %config.output_topic,
            "initializing point worker"
        );

        let producer = Arc::new(NatsPointProducer::new(
            Arc::clone(&queue),
            config.output_topic.clone(),
        ));
        let service = Arc::new(PointAccumulationService::new(
            points,
            producer,
            Arc::clone(&metrics),
            config.call_timeout,
        ));

        let subscription = queue
            .subscribe(&config.input_topic, &config.consumer_group)
            .await?;
        let stack = envelope_consumer_stack(&config.consumer_group, service, metrics);
        let pool = WorkerPool::new(
            "point_worker",
            Arc::clone(&subscription),
            stack,
            WorkerPoolConfig {
                workers: config.workers,
                shutdown_grace_period: config.shutdown_grace_period,
            },
        );

        Ok(Self { subscription, pool })
    }

    /// Subscription handle for the shutdown closer
    pub fn subscription(&self) -> Arc<dyn Subscription> {
        Arc::clone(&self.subscription)
    }

    /// Consume until `ctx` is cancelled, then drain in-flight messages
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        self.pool.run(ctx).await
    }
}
