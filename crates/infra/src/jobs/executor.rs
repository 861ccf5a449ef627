//! Worker Runtime: consumers per named queue, dispatching to handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::handlers::{HandlerError, JobHandler};
use super::store::{Broker, BrokerError, ClaimedJob, DEFAULT_VISIBILITY_TIMEOUT};
use super::types::{JobId, JobStatus};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Worker runtime configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent consumers per queue
    pub concurrency: usize,
    /// Idle wait between empty polls
    pub poll_interval: Duration,
    /// How often a running job's lock is extended; keep it well under the
    /// broker's visibility timeout
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_VISIBILITY_TIMEOUT / 3,
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }
}

/// Runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RuntimeStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub current_running: usize,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    running: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            jobs_processed: self.processed.load(Ordering::Relaxed),
            jobs_succeeded: self.succeeded.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            current_running: self.running.load(Ordering::Relaxed),
        }
    }
}

/// Consumes named queues and runs their handlers.
///
/// Each queue gets `concurrency` independent consumers; jobs of the same queue
/// run in parallel with no ordering between them. A handler runs in its own
/// task, so a panic fails the attempt instead of killing the consumer.
pub struct WorkerRuntime {
    broker: Arc<dyn Broker>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    config: WorkerConfig,
    counters: Arc<Counters>,
}

impl WorkerRuntime {
    pub fn new(broker: Arc<dyn Broker>, config: WorkerConfig) -> Self {
        Self {
            broker,
            handlers: HashMap::new(),
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Register the handler for a queue.
    pub fn register(mut self, queue: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(queue.into(), handler);
        self
    }

    pub fn register_all(
        mut self,
        handlers: impl IntoIterator<Item = (&'static str, Arc<dyn JobHandler>)>,
    ) -> Self {
        for (queue, handler) in handlers {
            self.handlers.insert(queue.to_string(), handler);
        }
        self
    }

    pub fn stats(&self) -> RuntimeStats {
        self.counters.snapshot()
    }

    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Claim and run at most one job from `queue`.
    ///
    /// Returns the id of the job that ran, or `None` if the queue was empty.
    pub async fn run_next(&self, queue: &str) -> Result<Option<JobId>, BrokerError> {
        let handler = self
            .handlers
            .get(queue)
            .cloned()
            .ok_or_else(|| BrokerError::Storage(format!("no handler for queue {queue}")))?;
        let consumer = Consumer {
            queue: queue.to_string(),
            broker: self.broker.clone(),
            handler,
            config: self.config.clone(),
            counters: self.counters.clone(),
        };
        consumer.run_next_job().await
    }

    /// Spawn the consumers.
    pub fn start(self) -> RuntimeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        for (queue, handler) in &self.handlers {
            for i in 1..=self.config.concurrency {
                let name = format!("worker-{queue}-{i}");
                info!(worker.name = %name, "starting worker");

                let consumer = Consumer {
                    queue: queue.clone(),
                    broker: self.broker.clone(),
                    handler: handler.clone(),
                    config: self.config.clone(),
                    counters: self.counters.clone(),
                };
                let shutdown = shutdown_rx.clone();
                let span = info_span!("worker", worker.name = %name);
                handles.push(tokio::spawn(
                    async move { consumer.run(shutdown).await }.instrument(span),
                ));
            }
        }

        RuntimeHandle {
            shutdown: shutdown_tx,
            handles,
            counters: self.counters,
        }
    }
}

/// Handle to running consumers.
#[derive(Debug)]
pub struct RuntimeHandle {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl RuntimeHandle {
    pub fn stats(&self) -> RuntimeStats {
        self.counters.snapshot()
    }

    /// Stop claiming, wait for in-flight jobs, abort after `timeout`.
    ///
    /// Returns `true` if every consumer drained in time. Jobs cut off by the
    /// timeout keep their lock until it expires and are then redelivered.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        let _ = self.shutdown.send(true);

        let drained = tokio::time::timeout(timeout, async {
            for handle in self.handles.iter_mut() {
                if let Err(error) = handle.await {
                    warn!(%error, "worker task panicked");
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(?timeout, "workers did not drain in time; aborting");
            for handle in &self.handles {
                handle.abort();
            }
        } else {
            info!("all workers drained");
        }
        drained
    }
}

/// Aborts the handler task when the consumer is dropped mid-job, e.g. by a
/// shutdown timeout, so it cannot keep pushing after the runtime stopped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Consumer {
    queue: String,
    broker: Arc<dyn Broker>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    counters: Arc<Counters>,
}

impl Consumer {
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_next_job().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(error) => {
                    error!(queue = %self.queue, %error, "failed to run job");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        debug!(queue = %self.queue, "worker stopped");
    }

    async fn run_next_job(&self) -> Result<Option<JobId>, BrokerError> {
        let Some(claimed) = self.broker.claim(&self.queue).await? else {
            return Ok(None);
        };
        let id = claimed.job.id;
        let span = info_span!("job", job.id = %id, queue = %self.queue, attempt = claimed.job.attempt);
        self.execute(claimed).instrument(span).await?;
        Ok(Some(id))
    }

    async fn execute(&self, claimed: ClaimedJob) -> Result<(), BrokerError> {
        let ClaimedJob { job, token } = claimed;
        let id = job.id;
        debug!("running job");
        self.counters.running.fetch_add(1, Ordering::Relaxed);

        let handler = self.handler.clone();
        let mut task = AbortOnDrop(tokio::spawn(
            async move { handler.handle(&job).await }.in_current_span(),
        ));

        let mut heartbeat =
            tokio::time::interval(self.config.heartbeat_interval.max(Duration::from_millis(10)));
        heartbeat.tick().await;
        let joined = loop {
            tokio::select! {
                joined = &mut task.0 => break joined,
                _ = heartbeat.tick() => {
                    if let Err(error) = self.broker.extend_lock(id, token).await {
                        warn!(%error, "failed to extend job lock");
                    }
                }
            }
        };

        let result: Result<Option<Value>, HandlerError> = match joined {
            Ok(result) => result,
            Err(join_error) => Err(HandlerError::Panicked(join_error.to_string())),
        };

        self.counters.running.fetch_sub(1, Ordering::Relaxed);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(return_value) => {
                match self.broker.complete(id, token, return_value).await {
                    Ok(()) => {
                        self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                        debug!("job completed")
                    }
                    Err(BrokerError::LockLost(_)) => {
                        warn!("job finished after its lock was lost; it may run again")
                    }
                    Err(error) => return Err(error),
                }
            }
            Err(handler_error) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                match self.broker.fail(id, token, handler_error.to_string()).await {
                    Ok(JobStatus::Failed { attempts, .. }) => {
                        error!(error = %handler_error, attempts, "job failed permanently")
                    }
                    Ok(status) => {
                        warn!(error = %handler_error, status = status.name(), "job attempt failed; will retry")
                    }
                    Err(BrokerError::LockLost(_)) => {
                        warn!(error = %handler_error, "job failed after its lock was lost")
                    }
                    Err(error) => return Err(error),
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::{InMemoryBroker, NewJob};
    use crate::jobs::types::{Job, JobKind, RetryPolicy};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    struct Succeed;

    #[async_trait]
    impl JobHandler for Succeed {
        async fn handle(&self, job: &Job) -> Result<Option<Value>, HandlerError> {
            Ok(Some(json!({ "echo": job.payload })))
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl JobHandler for AlwaysFail {
        async fn handle(&self, _job: &Job) -> Result<Option<Value>, HandlerError> {
            Err(HandlerError::Transport("connection refused".into()))
        }
    }

    struct Panics;

    #[async_trait]
    impl JobHandler for Panics {
        async fn handle(&self, _job: &Job) -> Result<Option<Value>, HandlerError> {
            panic!("handler bug")
        }
    }

    /// Records payloads, sleeping first when asked to.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Value>>,
        delay: Duration,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: &Job) -> Result<Option<Value>, HandlerError> {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(job.payload.clone());
            Ok(None)
        }
    }

    fn job(payload: Value) -> NewJob {
        NewJob::new(JobKind::Notification, payload)
    }

    #[tokio::test]
    async fn successful_job_completes_with_return_value() {
        let broker = InMemoryBroker::arc();
        let runtime = WorkerRuntime::new(broker.clone(), WorkerConfig::default())
            .register("notification", Arc::new(Succeed));

        let id = broker.enqueue(job(json!({ "n": 1 }))).await.unwrap();
        assert_eq!(runtime.run_next("notification").await.unwrap(), Some(id));

        let stored = broker.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.return_value, Some(json!({ "echo": { "n": 1 } })));
        assert_eq!(runtime.run_next("notification").await.unwrap(), None);
    }

    #[tokio::test]
    async fn handler_error_enters_retry_then_fails() {
        let broker = InMemoryBroker::arc();
        let runtime = WorkerRuntime::new(broker.clone(), WorkerConfig::default())
            .register("notification", Arc::new(AlwaysFail));

        let id = broker
            .enqueue(job(json!({})).with_retry_policy(RetryPolicy::fixed(2, Duration::ZERO)))
            .await
            .unwrap();

        runtime.run_next("notification").await.unwrap();
        let stored = broker.get(id).await.unwrap().unwrap();
        assert!(matches!(stored.status, JobStatus::Delayed { attempt: 1, .. }));

        runtime.run_next("notification").await.unwrap();
        let stored = broker.get(id).await.unwrap().unwrap();
        match stored.status {
            JobStatus::Failed { error, attempts } => {
                assert_eq!(attempts, 2);
                assert!(error.contains("connection refused"));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_handler_fails_the_attempt() {
        let broker = InMemoryBroker::arc();
        let runtime = WorkerRuntime::new(broker.clone(), WorkerConfig::default())
            .register("notification", Arc::new(Panics));

        let id = broker
            .enqueue(job(json!({})).with_retry_policy(RetryPolicy::no_retry()))
            .await
            .unwrap();
        runtime.run_next("notification").await.unwrap();

        let stored = broker.get(id).await.unwrap().unwrap();
        assert!(matches!(stored.status, JobStatus::Failed { .. }));
    }

    #[tokio::test]
    async fn started_runtime_drains_queue_and_shuts_down() {
        let broker = InMemoryBroker::arc();
        let recorder = Arc::new(Recorder::default());
        let config = WorkerConfig::default()
            .with_concurrency(3)
            .with_poll_interval(Duration::from_millis(10));
        let handle = WorkerRuntime::new(broker.clone(), config)
            .register("notification", recorder.clone())
            .start();

        for n in 0..10 {
            broker.enqueue(job(json!({ "n": n }))).await.unwrap();
        }

        for _ in 0..200 {
            if broker.stats("notification").await.unwrap().completed == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(recorder.seen.lock().unwrap().len(), 10);
        assert_eq!(handle.stats().jobs_succeeded, 10);
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_job() {
        let broker = InMemoryBroker::arc();
        let recorder = Arc::new(Recorder {
            seen: Mutex::default(),
            delay: Duration::from_millis(200),
        });
        let config = WorkerConfig::default()
            .with_concurrency(1)
            .with_poll_interval(Duration::from_millis(5));
        let handle = WorkerRuntime::new(broker.clone(), config)
            .register("notification", recorder.clone())
            .start();

        let id = broker.enqueue(job(json!({}))).await.unwrap();
        for _ in 0..100 {
            if handle.stats().current_running == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(handle.shutdown(Duration::from_secs(2)).await);
        assert_eq!(broker.get(id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn completion_after_lost_lock_is_not_a_success() {
        let broker = Arc::new(
            InMemoryBroker::new().with_visibility_timeout(Duration::from_millis(20)),
        );
        let recorder = Arc::new(Recorder {
            seen: Mutex::default(),
            delay: Duration::from_millis(100),
        });
        let config = WorkerConfig::default().with_heartbeat_interval(Duration::from_secs(10));
        let runtime = Arc::new(
            WorkerRuntime::new(broker.clone(), config).register("notification", recorder),
        );

        let id = broker.enqueue(job(json!({}))).await.unwrap();
        let running = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.run_next("notification").await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let taken = broker.claim("notification").await.unwrap().unwrap();
        assert_eq!(taken.job.id, id);

        running.await.unwrap().unwrap();
        let stats = runtime.stats();
        assert_eq!(stats.jobs_processed, 1);
        assert_eq!(stats.jobs_succeeded, 0);
        assert_eq!(broker.get(id).await.unwrap().unwrap().status, JobStatus::Active);
    }

    struct SlowFlag {
        done: Arc<AtomicBool>,
    }

    #[async_trait]
    impl JobHandler for SlowFlag {
        async fn handle(&self, _job: &Job) -> Result<Option<Value>, HandlerError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.done.store(true, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[tokio::test]
    async fn shutdown_timeout_aborts_the_running_handler() {
        let broker = InMemoryBroker::arc();
        let done = Arc::new(AtomicBool::new(false));
        let config = WorkerConfig::default()
            .with_concurrency(1)
            .with_poll_interval(Duration::from_millis(5));
        let handle = WorkerRuntime::new(broker.clone(), config)
            .register("notification", Arc::new(SlowFlag { done: done.clone() }))
            .start();

        broker.enqueue(job(json!({}))).await.unwrap();
        for _ in 0..100 {
            if handle.stats().current_running == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!handle.shutdown(Duration::from_millis(50)).await);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!done.load(Ordering::SeqCst));
    }
}
