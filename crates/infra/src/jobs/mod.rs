//! Background job pipeline: broker, producer and worker runtime.
//!
//! ## Components
//!
//! - `Broker`: durable, named, at-least-once job store (in-memory or Postgres)
//!   with visibility locks and age-based retention
//! - `JobProducer`: validates payloads and enqueues one job per control-plane
//!   action
//! - `WorkerRuntime`: per-queue consumers dispatching to `JobHandler`s
//! - `RetentionCleaner`: purges finished jobs past their retention window
//!
//! Delivery is at-least-once. A crash between a local entity write and the
//! enqueue can drop the job unless both go through one Postgres transaction
//! (`PostgresBroker::enqueue_in_tx`).

pub mod clock;
pub mod executor;
pub mod handlers;
pub mod payload;
pub mod postgres;
pub mod producer;
pub mod retention;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use executor::{RuntimeHandle, RuntimeStats, WorkerConfig, WorkerRuntime};
pub use handlers::{
    AdsPushHandler, ArticlePushHandler, ContentInsertHandler, HandlerError, JobHandler,
    NotificationHandler, PipelineHandlers, RejectionPolicy,
};
pub use payload::{
    AdsPushJob, ArticlePushJob, ContentInsertJob, EmailData, JobPayload, NotificationJob,
    PushArticle, WebsiteTarget,
};
pub use postgres::PostgresBroker;
pub use producer::{JobProducer, ProduceError};
pub use retention::{RetentionCleaner, RetentionPolicy};
pub use store::{
    Broker, BrokerError, ClaimedJob, DEFAULT_VISIBILITY_TIMEOUT, InMemoryBroker, JobStats, NewJob,
};
pub use types::{BackoffStrategy, Job, JobAttemptRecord, JobId, JobKind, JobStatus, RetryPolicy};
