//! Store trait abstractions
//!
//! Workers, cron stages and intake only see these traits, so they can be exercised
//! against the in-memory implementations without a database.

use async_trait::async_trait;
use mediaflow_core::error::AppError;
use mediaflow_core::models::{
    AiClaim, AiEnrichment, ClaimLimits, DerivativePaths, EmbeddingClaim, MediaItem, MediaJob,
    MediaKind, NewMediaItem, ProcessingStatus, RetryPolicy,
};
use std::time::Duration;
use uuid::Uuid;

/// Which media items the AI stage may claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiClaimFilter {
    pub processing_statuses: Vec<ProcessingStatus>,
    pub media_kinds: Vec<MediaKind>,
}

impl Default for AiClaimFilter {
    /// Queued image items. Video items are never enriched.
    fn default() -> Self {
        Self {
            processing_statuses: vec![ProcessingStatus::Queued],
            media_kinds: vec![MediaKind::Image],
        }
    }
}

impl AiClaimFilter {
    pub fn matches(&self, status: ProcessingStatus, kind: MediaKind) -> bool {
        self.processing_statuses.contains(&status) && self.media_kinds.contains(&kind)
    }

    pub(crate) fn status_names(&self) -> Vec<String> {
        self.processing_statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }

    pub(crate) fn kind_names(&self) -> Vec<String> {
        self.media_kinds.iter().map(|k| k.as_str().to_string()).collect()
    }
}

/// Lifecycle of a media item. Every write is a single statement keyed by media id.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert(&self, item: NewMediaItem) -> Result<MediaItem, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<MediaItem>, AppError>;

    /// Moves the item to `processing`. Returns false when the item does not exist or
    /// is already `completed`.
    async fn mark_processing(&self, id: Uuid) -> Result<bool, AppError>;

    async fn mark_completed(&self, id: Uuid, paths: &DerivativePaths) -> Result<(), AppError>;

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), AppError>;
}

/// AI and embedding sub-machines stored on `media_ai_data`.
#[async_trait]
pub trait EnrichmentStore: Send + Sync {
    /// Idempotent insert. Returns true when a row was created.
    async fn ensure_row(&self, media_id: Uuid, media_type: MediaKind) -> Result<bool, AppError>;

    /// Claims up to `limits.batch_size` eligible items and marks their rows
    /// `processing` in one transaction. Rows at the attempt cap are never returned.
    async fn claim_for_ai(
        &self,
        filter: &AiClaimFilter,
        limits: ClaimLimits,
    ) -> Result<Vec<AiClaim>, AppError>;

    /// Claims a single media item regardless of its processing status.
    async fn claim_media_for_ai(
        &self,
        media_id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<AiClaim>, AppError>;

    async fn complete_ai(
        &self,
        enrichment_id: Uuid,
        description: &str,
        tags: &[String],
    ) -> Result<(), AppError>;

    /// Records a failed attempt. Returns the new attempt count, or `None` when the
    /// row was no longer claimed.
    async fn fail_ai(&self, enrichment_id: Uuid, error: &str) -> Result<Option<i32>, AppError>;

    /// Claims up to `limits.batch_size` completed rows whose embedding is pending or
    /// failed under the cap, marking `embedding_status = processing`.
    async fn claim_for_embedding(&self, limits: ClaimLimits)
        -> Result<Vec<EmbeddingClaim>, AppError>;

    async fn claim_enrichment_for_embedding(
        &self,
        enrichment_id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<EmbeddingClaim>, AppError>;

    async fn complete_embedding(&self, enrichment_id: Uuid) -> Result<(), AppError>;

    async fn fail_embedding(
        &self,
        enrichment_id: Uuid,
        error: &str,
    ) -> Result<Option<i32>, AppError>;

    async fn get_by_media(&self, media_id: Uuid) -> Result<Option<AiEnrichment>, AppError>;

    /// Fails claims left in `processing` for longer than `older_than`, counting the
    /// lost run as an attempt. Returns the number of rows released across both stages.
    async fn release_stale_claims(&self, older_than: Duration) -> Result<u64, AppError>;
}

/// Outcome of one stale-job sweep.
#[derive(Debug, Clone, Default)]
pub struct ReapedJobs {
    /// Jobs returned to `waiting` for another attempt.
    pub requeued: u64,
    /// Jobs failed for good. Their media items still need to be marked failed.
    pub exhausted: Vec<MediaJob>,
}

impl ReapedJobs {
    pub fn total(&self) -> u64 {
        self.requeued + self.exhausted.len() as u64
    }
}

/// Durable per-kind job queues.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(
        &self,
        kind: MediaKind,
        payload: serde_json::Value,
        policy: RetryPolicy,
    ) -> Result<MediaJob, AppError>;

    /// Claims the next due job on `queue`, marking it active and counting the attempt.
    async fn claim_next(&self, queue: &str) -> Result<Option<MediaJob>, AppError>;

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), AppError>;

    /// Puts the job back on its queue, due after `delay`.
    async fn schedule_retry(&self, job_id: Uuid, error: &str, delay: Duration)
        -> Result<(), AppError>;

    /// Drops the job as terminally failed.
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), AppError>;

    /// Returns jobs stuck `active` for longer than `stale_after` to the queue, or fails
    /// them when they have no attempts left.
    async fn reap_stale(&self, queue: &str, stale_after: Duration)
        -> Result<ReapedJobs, AppError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<MediaJob>, AppError>;
}
