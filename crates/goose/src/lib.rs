use anyhow::{bail, Context, Result};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs goose migrations by spawning the goose binary.
pub struct MigrationRunner {
    goose_binary_path: String,
    migrations_dir: String,
    /// goose driver name, e.g. "postgres"
    driver: String,
    dsn: String,
}

impl MigrationRunner {
    pub fn new(
        goose_binary_path: String,
        migrations_dir: String,
        driver: String,
        dsn: String,
    ) -> Self {
        Self {
            goose_binary_path,
            migrations_dir,
            driver,
            dsn,
        }
    }

    /// Postgres runner for the given connection parameters, TLS disabled
    pub fn postgres(
        goose_binary_path: String,
        migrations_dir: String,
        host: &str,
        port: u16,
        database: &str,
        username: &str,
        password: &str,
    ) -> Self {
        let dsn = format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            username, password, host, port, database
        );
        Self::new(goose_binary_path, migrations_dir, "postgres".to_string(), dsn)
    }

    async fn goose(&self, command: &str) -> Result<Output> {
        Command::new(&self.goose_binary_path)
            .arg("-dir")
            .arg(&self.migrations_dir)
            .arg(&self.driver)
            .arg(&self.dsn)
            .arg(command)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.goose_binary_path))
    }

    /// `goose up`
    pub async fn run_migrations(&self) -> Result<()> {
        debug!(migrations_dir = %self.migrations_dir, "running migrations");

        let output = self.goose("up").await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            bail!("Migration failed.\nstdout: {}\nstderr: {}", stdout, stderr);
        }

        info!(migrations_dir = %self.migrations_dir, "migrations applied");
        debug!("{}", String::from_utf8_lossy(&output.stdout));
        Ok(())
    }

    /// `goose status`
    pub async fn migration_status(&self) -> Result<String> {
        let output = self.goose("status").await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Failed to get migration status: {}", stderr);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
