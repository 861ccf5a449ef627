//! Age-based retention of finished jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::Broker;
use super::types::{Job, JobStatus, to_chrono};

const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// How long finished jobs stay observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub completed: Duration,
    pub failed: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed: Duration::from_secs(60 * 60),
            failed: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RetentionPolicy {
    /// Instant after which `job` is no longer observable, if it is finished.
    pub fn expires_at(&self, job: &Job) -> Option<DateTime<Utc>> {
        let ttl = match job.status {
            JobStatus::Completed => self.completed,
            JobStatus::Failed { .. } => self.failed,
            _ => return None,
        };
        job.finished_at.map(|finished| finished + to_chrono(ttl))
    }

    pub fn is_expired(&self, job: &Job, now: DateTime<Utc>) -> bool {
        self.expires_at(job).is_some_and(|at| now >= at)
    }
}

/// Periodically purges expired jobs from a broker.
pub struct RetentionCleaner {
    broker: Arc<dyn Broker>,
    interval: Duration,
}

impl RetentionCleaner {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one purge pass.
    pub async fn run_once(&self) -> usize {
        match self.broker.purge_expired().await {
            Ok(0) => 0,
            Ok(purged) => {
                info!(purged, "purged expired jobs");
                purged
            }
            Err(error) => {
                warn!(%error, "failed to purge expired jobs");
                0
            }
        }
    }

    /// Spawn the purge loop; it stops when `shutdown` flips to `true`.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("retention cleaner stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
