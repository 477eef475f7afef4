//! Queue broker client: typed enqueue and payload decoding.

use std::sync::Arc;

use mediaflow_core::models::{JobPayload, MediaJob, RetryPolicy};
use mediaflow_core::{AppError, TaskError};
use mediaflow_db::JobStore;

/// Puts typed payloads on the queue of their media kind with a fixed retry policy.
#[derive(Clone)]
pub struct QueueBroker {
    jobs: Arc<dyn JobStore>,
    policy: RetryPolicy,
}

impl QueueBroker {
    pub fn new(jobs: Arc<dyn JobStore>, policy: RetryPolicy) -> Self {
        Self { jobs, policy }
    }

    pub fn from_config(jobs: Arc<dyn JobStore>, config: &mediaflow_core::Config) -> Self {
        Self::new(
            jobs,
            RetryPolicy::exponential(config.queue_attempts, config.queue_backoff()),
        )
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Durably records `payload` on `P::kind()`'s queue. Errors are returned to the
    /// caller untouched so intake can roll back.
    #[tracing::instrument(skip(self, payload), fields(media_id = %payload.media_id(), queue = P::kind().queue_name()))]
    pub async fn enqueue<P: JobPayload>(&self, payload: &P) -> Result<MediaJob, AppError> {
        let value = serde_json::to_value(payload)?;
        let job = self.jobs.enqueue(P::kind(), value, self.policy).await?;

        tracing::info!(
            job_id = %job.id,
            attempts = self.policy.attempts,
            backoff_ms = self.policy.initial_backoff.as_millis() as u64,
            "Job enqueued"
        );
        Ok(job)
    }
}

/// Decodes the payload of a claimed job. A payload that does not match `P` can never
/// succeed, so the error is unrecoverable.
pub fn decode_payload<P: JobPayload>(job: &MediaJob) -> Result<P, TaskError> {
    serde_json::from_value(job.payload.clone()).map_err(|e| {
        TaskError::unrecoverable(anyhow::anyhow!(
            "Invalid {} payload on job {}: {}",
            P::kind(),
            job.id,
            e
        ))
    })
}
