mod config;

use anyhow::Context;
use common::domain::{EventRepository, PointRepository, RuleRepository};
use common::nats::{NatsQueue, Queue, Subscription};
use common::pipeline_metrics::RecorderMetrics;
use common::postgres::{
    PostgresClient, PostgresEventRepository, PostgresPointRepository, PostgresRuleRepository,
};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders};
use config::ServiceConfig;
use fieldline_runner::Runner;
use goose::MigrationRunner;
use point_worker::{PointWorker, PointWorkerConfig};
use rule_worker::{RuleWorker, RuleWorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&config.telemetry())
    {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        rule_worker_enabled = config.rule_worker_enabled,
        point_worker_enabled = config.point_worker_enabled,
        "Starting fieldline service"
    );
    debug!("Configuration: {:?}", config);

    let deps = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to initialize shared dependencies");
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let stores = Stores {
        rules: Arc::new(PostgresRuleRepository::new(deps.read_only.clone())),
        events: Arc::new(PostgresEventRepository::new(deps.read_write.clone())),
        points: Arc::new(PostgresPointRepository::new(deps.read_write.clone())),
    };
    let rule_worker = config.rule_worker_enabled.then(|| config.rule_worker());
    let point_worker = config.point_worker_enabled.then(|| config.point_worker());

    let Pipelines {
        runner,
        subscriptions,
    } = match build_pipelines(&deps.queue, stores, rule_worker, point_worker).await {
        Ok(pipelines) => pipelines,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to initialize pipelines");
            if let Err(e) = deps.queue.disconnect().await {
                warn!(error = %e, "failed to disconnect from NATS");
            }
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    if subscriptions.is_empty() {
        warn!("No pipeline enabled, nothing to run");
    }

    let queue = Arc::clone(&deps.queue);
    runner
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            for subscription in subscriptions {
                if let Err(e) = subscription.unsubscribe().await {
                    warn!(error = %e, "failed to unsubscribe");
                }
            }
            if let Err(e) = queue.disconnect().await {
                warn!(error = %e, "failed to disconnect from NATS");
            }
            shutdown_telemetry(telemetry_providers);
            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.closer_timeout_secs))
        .run()
        .await;
}

struct Pipelines {
    runner: Runner,
    subscriptions: Vec<Arc<dyn Subscription>>,
}

struct Stores {
    rules: Arc<dyn RuleRepository>,
    events: Arc<dyn EventRepository>,
    points: Arc<dyn PointRepository>,
}

/// Subscribe the enabled workers and register them with a runner.
///
/// On failure the subscriptions already taken are released before the error
/// is returned.
async fn build_pipelines(
    queue: &Arc<dyn Queue>,
    stores: Stores,
    rule_worker: Option<RuleWorkerConfig>,
    point_worker: Option<PointWorkerConfig>,
) -> anyhow::Result<Pipelines> {
    let mut runner = Runner::new();
    let mut subscriptions: Vec<Arc<dyn Subscription>> = Vec::new();

    if let Some(worker_config) = rule_worker {
        let worker = RuleWorker::new(
            Arc::clone(queue),
            stores.rules,
            stores.events,
            RecorderMetrics::shared("rules"),
            worker_config,
        )
        .await
        .context("failed to initialize rule worker");
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => return Err(release(subscriptions, e).await),
        };
        subscriptions.push(worker.subscription());
        runner = runner.with_named_process("rule_worker", move |ctx| worker.run(ctx));
    }

    if let Some(worker_config) = point_worker {
        let worker = PointWorker::new(
            Arc::clone(queue),
            stores.points,
            RecorderMetrics::shared("points"),
            worker_config,
        )
        .await
        .context("failed to initialize point worker");
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => return Err(release(subscriptions, e).await),
        };
        subscriptions.push(worker.subscription());
        runner = runner.with_named_process("point_worker", move |ctx| worker.run(ctx));
    }

    Ok(Pipelines {
        runner,
        subscriptions,
    })
}

async fn release(subscriptions: Vec<Arc<dyn Subscription>>, error: anyhow::Error) -> anyhow::Error {
    for subscription in subscriptions {
        if let Err(e) = subscription.unsubscribe().await {
            warn!(error = %e, "failed to unsubscribe");
        }
    }
    error
}

struct SharedDependencies {
    queue: Arc<dyn Queue>,
    read_write: PostgresClient,
    read_only: PostgresClient,
}

async fn initialize_shared_dependencies(config: &ServiceConfig) -> anyhow::Result<SharedDependencies> {
    info!("Initializing PostgreSQL...");
    if config.postgres_run_migrations {
        run_postgres_migrations(config).await?;
    }
    let read_write = PostgresClient::from_config(&config.postgres_read_write())?;
    let read_only = PostgresClient::from_config(&config.postgres_read_only())?;
    read_write.ping().await?;
    read_only.ping().await?;

    info!("Initializing NATS...");
    let nats = NatsQueue::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
        config.requeue_delay(),
    )
    .await?;
    for topic in [
        &config.envelopes_topic,
        &config.rule_events_topic,
        &config.points_topic,
    ] {
        nats.ensure_stream(topic).await?;
    }

    let queue: Arc<dyn Queue> = Arc::new(nats);
    queue.prime(&config.envelopes_topic).await?;

    Ok(SharedDependencies {
        queue,
        read_write,
        read_only,
    })
}

async fn run_postgres_migrations(config: &ServiceConfig) -> anyhow::Result<()> {
    let runner = MigrationRunner::postgres(
        config.postgres_goose_binary_path.clone(),
        config.postgres_migrations_dir.clone(),
        &config.postgres_host,
        config.postgres_port,
        &config.postgres_database,
        &config.postgres_username,
        &config.postgres_password,
    );
    runner.run_migrations().await
}
