//! pushdeck-worker: consumes the pipeline queues from the shared Postgres
//! broker and pushes to tenant backends.
//!
//! Several worker processes may run against the same database; the broker's
//! visibility lock keeps each job on one worker at a time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use pushdeck_infra::AppConfig;
use pushdeck_infra::entity_store::PostgresEntityStore;
use pushdeck_infra::jobs::{
    PipelineHandlers, PostgresBroker, RetentionCleaner, WorkerConfig, WorkerRuntime,
};
use pushdeck_infra::mail::{LogMailer, Mailer, SmtpMailer, spawn_mail_verifier};
use pushdeck_infra::push::PushGateway;

// ── CLI ─────────────────────────────────────────────────────────────

/// Background worker for content, article, ads and notification jobs.
#[derive(Parser, Debug)]
#[command(name = "pushdeck-worker", version, about)]
struct Cli {
    /// Parallel jobs per queue. Defaults to the shared configuration.
    #[arg(long, env = "WORKER_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Idle sleep between polls of an empty queue, in milliseconds.
    #[arg(long, env = "WORKER_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Interval between retention purges, in seconds.
    #[arg(long, env = "RETENTION_CLEANUP_INTERVAL_SECS", default_value_t = 60)]
    cleanup_interval_secs: u64,

    /// How long in-flight jobs may run after a shutdown signal, in seconds.
    #[arg(long, env = "WORKER_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    shutdown_timeout_secs: u64,
}

impl Cli {
    fn worker_config(&self, config: &AppConfig) -> WorkerConfig {
        WorkerConfig::default()
            .with_concurrency(self.concurrency.unwrap_or(config.worker_concurrency).max(1))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms.max(1)))
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pushdeck_observability::init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;

    let url = config
        .database_url
        .clone()
        .context("DATABASE_URL is required for pushdeck-worker")?;
    let pool = sqlx::PgPool::connect(&url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    let broker = Arc::new(PostgresBroker::new(pool.clone()));
    broker.ensure_schema().await?;
    let store = Arc::new(PostgresEntityStore::new(pool));
    store.ensure_schema().await?;

    // The relay probe runs alongside consumption and never blocks it.
    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            let mailer = Arc::new(SmtpMailer::new(smtp)?);
            spawn_mail_verifier(mailer.clone());
            mailer
        }
        None => {
            warn!("SMTP_HOST not set; notification emails will only be logged");
            Arc::new(LogMailer)
        }
    };

    let handlers = PipelineHandlers {
        store,
        gateway: PushGateway::new(config.push.clone())?,
        mailer,
        rejection: config.rejection_policy,
    };
    let runtime = WorkerRuntime::new(broker.clone(), cli.worker_config(&config))
        .register_all(handlers.into_handlers());
    info!(queues = ?runtime.queues().collect::<Vec<_>>(), "pushdeck-worker starting");
    let runtime = runtime.start();

    let (cleaner_tx, cleaner_rx) = watch::channel(false);
    let cleaner = RetentionCleaner::new(broker)
        .with_interval(Duration::from_secs(cli.cleanup_interval_secs.max(1)))
        .start(cleaner_rx);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received; draining workers");

    let _ = cleaner_tx.send(true);
    let _ = cleaner.await;

    let stats = runtime.stats();
    let drained = runtime
        .shutdown(Duration::from_secs(cli.shutdown_timeout_secs))
        .await;
    info!(
        processed = stats.jobs_processed,
        succeeded = stats.jobs_succeeded,
        failed = stats.jobs_failed,
        drained,
        "pushdeck-worker exited"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_shared_concurrency() {
        let config = AppConfig::from_lookup(|_| None).unwrap();

        let cli = Cli::try_parse_from(["pushdeck-worker"]).unwrap();
        assert_eq!(cli.worker_config(&config).concurrency, config.worker_concurrency);
        assert_eq!(cli.shutdown_timeout_secs, 30);

        let cli = Cli::try_parse_from([
            "pushdeck-worker",
            "--concurrency",
            "16",
            "--poll-interval-ms",
            "250",
        ])
        .unwrap();
        let worker = cli.worker_config(&config);
        assert_eq!(worker.concurrency, 16);
        assert_eq!(worker.poll_interval, Duration::from_millis(250));
    }
}
