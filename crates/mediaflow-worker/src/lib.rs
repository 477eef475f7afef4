//! Mediaflow Worker
//!
//! Everything that moves a media item through the pipeline after upload:
//!
//! - [`broker::QueueBroker`] puts typed payloads on the per-kind durable queues.
//! - [`pool::WorkerPool`] consumes one queue with a bounded number of concurrent jobs,
//!   woken by LISTEN/NOTIFY and polling, and applies the retry policy.
//! - [`handlers`] turn a claimed job into derivatives (WebP renditions, HLS bundles).
//! - [`stages`] run the AI description and embedding passes over claimed batches.
//! - [`scheduler::Scheduler`] drives both stages on a fixed interval, single-flight.
//! - [`intake::IntakeService`] and [`status::StatusService`] are the entry and polling
//!   surfaces for callers.

pub mod broker;
pub mod handlers;
pub mod intake;
pub mod pool;
pub mod scheduler;
pub mod stages;
pub mod status;

pub use broker::QueueBroker;
pub use handlers::{ImageJobHandler, MediaJobHandler, VideoJobHandler};
pub use intake::{IntakeService, Upload};
pub use pool::{JobOutcome, JobRunner, WorkerPool, WorkerPoolConfig};
pub use scheduler::{CronJob, RunOutcome, ScheduledTask, Scheduler, SingleFlight};
pub use stages::{
    enrich_media_now, AiStage, AiStageConfig, EmbeddingStage, EmbeddingStageConfig, InlineOutcome,
    StageReport,
};
pub use status::{MediaStatus, StatusService};
