use common::postgres::PostgresConfig;
use common::telemetry::{LogFormat, TelemetryConfig};
use config::{Config, ConfigError, Environment};
use point_worker::PointWorkerConfig;
use rule_worker::RuleWorkerConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `json` or `pretty`
    #[serde(default)]
    pub log_format: LogFormat,

    // OpenTelemetry
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // NATS
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Connect timeout for NATS in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Delay before a requeued message is redelivered
    #[serde(default = "default_requeue_delay_ms")]
    pub requeue_delay_ms: u64,

    /// Topic both pipelines consume
    #[serde(default = "default_envelopes_topic")]
    pub envelopes_topic: String,

    // Rule pipeline
    #[serde(default = "default_enabled")]
    pub rule_worker_enabled: bool,

    #[serde(default = "default_rule_consumer_group")]
    pub rule_consumer_group: String,

    #[serde(default = "default_rule_events_topic")]
    pub rule_events_topic: String,

    #[serde(default = "default_workers")]
    pub rule_workers: usize,

    // Point pipeline
    #[serde(default = "default_enabled")]
    pub point_worker_enabled: bool,

    #[serde(default = "default_point_consumer_group")]
    pub point_consumer_group: String,

    #[serde(default = "default_points_topic")]
    pub points_topic: String,

    #[serde(default = "default_workers")]
    pub point_workers: usize,

    /// Upper bound on each store lookup, store write and publish
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// How long in-flight messages may finish after a shutdown signal
    #[serde(default = "default_shutdown_grace_period_secs")]
    pub shutdown_grace_period_secs: u64,

    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,

    // PostgreSQL
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    /// Replica used for rule lookups; the primary when unset
    #[serde(default)]
    pub postgres_read_only_host: Option<String>,

    #[serde(default)]
    pub postgres_read_only_port: Option<u16>,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    #[serde(default = "default_enabled")]
    pub postgres_run_migrations: bool,

    #[serde(default = "default_postgres_migrations_dir")]
    pub postgres_migrations_dir: String,

    #[serde(default = "default_postgres_goose_binary_path")]
    pub postgres_goose_binary_path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "fieldline".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_requeue_delay_ms() -> u64 {
    5000
}

fn default_envelopes_topic() -> String {
    "envelopes".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_rule_consumer_group() -> String {
    "rule_worker".to_string()
}

fn default_rule_events_topic() -> String {
    "rule_events".to_string()
}

fn default_point_consumer_group() -> String {
    "point_worker".to_string()
}

fn default_points_topic() -> String {
    "points".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_call_timeout_ms() -> u64 {
    3000
}

fn default_shutdown_grace_period_secs() -> u64 {
    10
}

fn default_closer_timeout_secs() -> u64 {
    10
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "fieldline".to_string()
}

fn default_postgres_username() -> String {
    "fieldline".to_string()
}

fn default_postgres_password() -> String {
    "fieldline".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

fn default_postgres_migrations_dir() -> String {
    "/home/fieldline/migrations/postgres".to_string()
}

fn default_postgres_goose_binary_path() -> String {
    "goose".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("FIELDLINE"))
            .build()?
            .try_deserialize()
    }

    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self.otel_service_name.clone(),
            otel_endpoint: self.otel_endpoint.clone(),
            otel_enabled: self.otel_enabled,
            log_level: self.log_level.clone(),
            log_format: self.log_format,
        }
    }

    pub fn postgres_read_write(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn postgres_read_only(&self) -> PostgresConfig {
        PostgresConfig {
            host: self
                .postgres_read_only_host
                .clone()
                .unwrap_or_else(|| self.postgres_host.clone()),
            port: self.postgres_read_only_port.unwrap_or(self.postgres_port),
            ..self.postgres_read_write()
        }
    }

    pub fn requeue_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_delay_ms)
    }

    pub fn rule_worker(&self) -> RuleWorkerConfig {
        RuleWorkerConfig {
            input_topic: self.envelopes_topic.clone(),
            consumer_group: self.rule_consumer_group.clone(),
            output_topic: self.rule_events_topic.clone(),
            workers: self.rule_workers,
            shutdown_grace_period: Duration::from_secs(self.shutdown_grace_period_secs),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }

    pub fn point_worker(&self) -> PointWorkerConfig {
        PointWorkerConfig {
            input_topic: self.envelopes_topic.clone(),
            consumer_group: self.point_consumer_group.clone(),
            output_topic: self.points_topic.clone(),
            workers: self.point_workers,
            shutdown_grace_period: Duration::from_secs(self.shutdown_grace_period_secs),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate process-wide environment variables
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "FIELDLINE_LOG_LEVEL",
        "FIELDLINE_LOG_FORMAT",
        "FIELDLINE_RULE_WORKERS",
        "FIELDLINE_POINT_WORKER_ENABLED",
        "FIELDLINE_POSTGRES_READ_ONLY_HOST",
        "FIELDLINE_CALL_TIMEOUT_MS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.rule_worker_enabled);
        assert!(config.point_worker_enabled);
        assert_eq!(config.requeue_delay(), Duration::from_secs(5));
        assert_eq!(config.rule_worker().call_timeout, Duration::from_secs(3));
        assert_eq!(config.postgres_read_only(), config.postgres_read_write());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("FIELDLINE_LOG_LEVEL", "debug");
        std::env::set_var("FIELDLINE_LOG_FORMAT", "pretty");
        std::env::set_var("FIELDLINE_RULE_WORKERS", "16");
        std::env::set_var("FIELDLINE_POINT_WORKER_ENABLED", "false");
        std::env::set_var("FIELDLINE_POSTGRES_READ_ONLY_HOST", "replica");
        std::env::set_var("FIELDLINE_CALL_TIMEOUT_MS", "250");

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.rule_worker().workers, 16);
        assert!(!config.point_worker_enabled);
        assert_eq!(config.postgres_read_only().host, "replica");
        assert_eq!(config.postgres_read_write().host, "localhost");
        assert_eq!(
            config.point_worker().call_timeout,
            Duration::from_millis(250)
        );

        clear_env();
    }
}
