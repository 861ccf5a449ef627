use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;

use pushdeck_api::app::{AppServices, build_app};
use pushdeck_api::seed::DevSeed;
use pushdeck_auth::InMemoryGrantStore;
use pushdeck_infra::AppConfig;
use pushdeck_infra::entity_store::{InMemoryEntityStore, PostgresEntityStore};
use pushdeck_infra::jobs::{
    Broker, InMemoryBroker, JobProducer, PipelineHandlers, PostgresBroker, RetentionCleaner,
    WorkerConfig, WorkerRuntime,
};
use pushdeck_infra::mail::{LogMailer, Mailer, SmtpMailer};
use pushdeck_infra::push::PushGateway;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pushdeck_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    match config.database_url.clone() {
        Some(url) => serve_with_postgres(&config, &url).await,
        None => serve_in_memory(&config).await,
    }
}

/// Producer-only deployment; `pushdeck-worker` processes consume the queues.
async fn serve_with_postgres(config: &AppConfig, url: &str) -> anyhow::Result<()> {
    let pool = sqlx::PgPool::connect(url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    let broker = Arc::new(PostgresBroker::new(pool.clone()));
    broker.ensure_schema().await?;
    let store = Arc::new(PostgresEntityStore::new(pool));
    store.ensure_schema().await?;

    let producer =
        JobProducer::new(broker, store.clone()).with_retry_policy(config.retry_policy());
    serve(config, AppServices::new(producer, store)).await
}

/// Development mode: in-memory backends, optionally seeded from
/// `DEV_SEED_FILE`, with the worker runtime embedded.
async fn serve_in_memory(config: &AppConfig) -> anyhow::Result<()> {
    tracing::warn!("DATABASE_URL not set; using in-memory backends and an embedded worker");

    let broker: Arc<dyn Broker> = InMemoryBroker::arc();
    let store = Arc::new(InMemoryEntityStore::new());
    let grants = Arc::new(InMemoryGrantStore::new());
    match &config.dev_seed_file {
        Some(path) => DevSeed::load(path)?.apply(&store, &grants),
        None => tracing::warn!("DEV_SEED_FILE not set; no website has any admin yet"),
    }

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
        None => Arc::new(LogMailer),
    };
    let handlers = PipelineHandlers {
        store: store.clone(),
        gateway: PushGateway::new(config.push.clone())?,
        mailer,
        rejection: config.rejection_policy,
    };
    let runtime = WorkerRuntime::new(
        broker.clone(),
        WorkerConfig::default().with_concurrency(config.worker_concurrency),
    )
    .register_all(handlers.into_handlers())
    .start();

    let (cleaner_tx, cleaner_rx) = watch::channel(false);
    let cleaner = RetentionCleaner::new(broker.clone()).start(cleaner_rx);

    let producer = JobProducer::new(broker, store).with_retry_policy(config.retry_policy());
    let served = serve(config, AppServices::new(producer, grants)).await;

    let _ = cleaner_tx.send(true);
    let _ = cleaner.await;
    runtime.shutdown(SHUTDOWN_TIMEOUT).await;
    served
}

async fn serve(config: &AppConfig, services: AppServices) -> anyhow::Result<()> {
    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(config.api_bind)
        .await
        .with_context(|| format!("failed to bind {}", config.api_bind))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
