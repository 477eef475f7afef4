//! In-memory store implementations for testing
//!
//! [`InMemoryStore`] implements [`MediaStore`], [`EnrichmentStore`] and [`JobStore`]
//! over one shared state, so claim operations see media items and enrichment rows
//! together the way the SQL joins do. Every operation holds the lock for its whole
//! duration, which makes claims atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaflow_core::models::{
    AiClaim, AiEnrichment, AiStatus, ClaimLimits, DeclaredMime, DerivativePaths, EmbeddingClaim,
    JobStatus, MediaItem, MediaJob, MediaKind, NewMediaItem, ProcessingStatus, RetryPolicy,
};
use mediaflow_core::AppError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::db::enrichment::STALE_CLAIM_ERROR;
use crate::db::job::STALE_JOB_ERROR;
use crate::traits::{AiClaimFilter, EnrichmentStore, JobStore, MediaStore, ReapedJobs};

#[derive(Default)]
struct State {
    media: HashMap<Uuid, MediaItem>,
    media_order: Vec<Uuid>,
    enrichments: HashMap<Uuid, AiEnrichment>,
    jobs: HashMap<Uuid, MediaJob>,
    job_order: Vec<Uuid>,
    fail_enqueue: bool,
}

impl State {
    fn enrichment_for_media_mut(&mut self, media_id: Uuid) -> Option<&mut AiEnrichment> {
        self.enrichments.values_mut().find(|e| e.media_id == media_id)
    }

    fn ensure_enrichment(&mut self, media_id: Uuid, media_type: MediaKind) -> bool {
        if self.enrichments.values().any(|e| e.media_id == media_id) {
            return false;
        }
        let now = Utc::now();
        let row = AiEnrichment {
            id: Uuid::new_v4(),
            media_id,
            media_type,
            description: None,
            tags: None,
            status: AiStatus::Pending,
            error: None,
            attempts: 0,
            completed_at: None,
            embedding_status: AiStatus::Pending,
            embedding_error: None,
            embedding_attempts: 0,
            embedding_completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.enrichments.insert(row.id, row);
        true
    }
}

fn ai_claimable(row: &AiEnrichment, max_attempts: i32) -> bool {
    row.status == AiStatus::Pending
        || (row.status == AiStatus::Failed && row.attempts < max_attempts)
}

fn embedding_claimable(row: &AiEnrichment, max_attempts: i32) -> bool {
    row.status == AiStatus::Completed
        && matches!(row.embedding_status, AiStatus::Pending | AiStatus::Failed)
        && row.embedding_attempts < max_attempts
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

fn embedding_claim(row: &AiEnrichment) -> EmbeddingClaim {
    EmbeddingClaim {
        enrichment_id: row.id,
        media_id: row.media_id,
        description: row.description.clone(),
        tags: row.tags.clone(),
        media_type: row.media_type,
    }
}

/// Builds a media item row as intake would record it.
pub fn sample_media(kind: MediaKind, status: ProcessingStatus) -> MediaItem {
    let now = Utc::now();
    let id = Uuid::new_v4();
    let (file_path, mime_type) = match kind {
        MediaKind::Image => (format!("images/originals/{}.png", id), "image/png"),
        MediaKind::Video => (format!("videos/originals/{}.mp4", id), "video/mp4"),
    };
    MediaItem {
        id,
        owner_id: "owner-1".to_string(),
        file_path,
        file_name: "upload".to_string(),
        mime_type: mime_type.to_string(),
        media_type: kind,
        file_size: Some(1024),
        width: None,
        height: None,
        duration_secs: None,
        rotation: None,
        codec: None,
        processing_status: status,
        thumbnail_path: None,
        placeholder_path: None,
        hls_dir: None,
        video_thumb_path: None,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a media item; claim order follows seeding order.
    pub fn add_media(&self, item: MediaItem) {
        let mut state = self.state.lock().unwrap();
        state.media_order.push(item.id);
        state.media.insert(item.id, item);
    }

    pub fn media(&self, id: Uuid) -> Option<MediaItem> {
        self.state.lock().unwrap().media.get(&id).cloned()
    }

    /// Every media item in seeding order.
    pub fn all_media(&self) -> Vec<MediaItem> {
        let state = self.state.lock().unwrap();
        state
            .media_order
            .iter()
            .filter_map(|id| state.media.get(id))
            .cloned()
            .collect()
    }

    pub fn add_enrichment(&self, row: AiEnrichment) {
        self.state.lock().unwrap().enrichments.insert(row.id, row);
    }

    pub fn enrichment_for(&self, media_id: Uuid) -> Option<AiEnrichment> {
        self.state
            .lock()
            .unwrap()
            .enrichments
            .values()
            .find(|e| e.media_id == media_id)
            .cloned()
    }

    pub fn enrichment_count(&self) -> usize {
        self.state.lock().unwrap().enrichments.len()
    }

    /// Runs `f` against the enrichment row of `media_id`.
    pub fn update_enrichment(&self, media_id: Uuid, f: impl FnOnce(&mut AiEnrichment)) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.enrichment_for_media_mut(media_id) {
            f(row);
        }
    }

    pub fn job(&self, id: Uuid) -> Option<MediaJob> {
        self.state.lock().unwrap().jobs.get(&id).cloned()
    }

    pub fn jobs_on(&self, queue: &str) -> Vec<MediaJob> {
        let state = self.state.lock().unwrap();
        state
            .job_order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job.queue == queue)
            .cloned()
            .collect()
    }

    /// Makes every later `enqueue` fail, as an unreachable broker would.
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.state.lock().unwrap().fail_enqueue = fail;
    }

    /// Backdates a job's lock, as if its worker had stopped long ago.
    pub fn backdate_job_lock(&self, job_id: Uuid, by: Duration) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.locked_at = job.locked_at.map(|t| t - to_chrono(by));
        }
    }

    /// Makes a job due immediately regardless of its backoff.
    pub fn make_job_due(&self, job_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.run_at = Utc::now();
        }
    }
}

#[async_trait]
impl MediaStore for InMemoryStore {
    async fn insert(&self, item: NewMediaItem) -> Result<MediaItem, AppError> {
        let now = Utc::now();
        let mime: DeclaredMime = item.mime;
        let row = MediaItem {
            id: Uuid::new_v4(),
            owner_id: item.owner_id,
            file_path: item.file_path,
            file_name: item.file_name,
            mime_type: mime.as_str().to_string(),
            media_type: mime.kind(),
            file_size: item.file_size,
            width: item.width,
            height: item.height,
            duration_secs: item.duration_secs,
            rotation: item.rotation,
            codec: item.codec,
            processing_status: item.processing_status,
            thumbnail_path: None,
            placeholder_path: None,
            hls_dir: None,
            video_thumb_path: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.add_media(row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MediaItem>, AppError> {
        Ok(self.media(id))
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.media.get_mut(&id) {
            Some(item) if item.processing_status.can_start_processing() => {
                item.processing_status = ProcessingStatus::Processing;
                item.error_message = None;
                item.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(&self, id: Uuid, paths: &DerivativePaths) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .media
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("media item {}", id)))?;
        item.processing_status = ProcessingStatus::Completed;
        if paths.thumbnail_path.is_some() {
            item.thumbnail_path = paths.thumbnail_path.clone();
        }
        if paths.placeholder_path.is_some() {
            item.placeholder_path = paths.placeholder_path.clone();
        }
        if paths.hls_dir.is_some() {
            item.hls_dir = paths.hls_dir.clone();
        }
        if paths.video_thumb_path.is_some() {
            item.video_thumb_path = paths.video_thumb_path.clone();
        }
        item.error_message = None;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.media.get_mut(&id) {
            if item.processing_status != ProcessingStatus::Completed {
                item.processing_status = ProcessingStatus::Failed;
                item.error_message = Some(message.to_string());
                item.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EnrichmentStore for InMemoryStore {
    async fn ensure_row(&self, media_id: Uuid, media_type: MediaKind) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .ensure_enrichment(media_id, media_type))
    }

    async fn claim_for_ai(
        &self,
        filter: &AiClaimFilter,
        limits: ClaimLimits,
    ) -> Result<Vec<AiClaim>, AppError> {
        let mut state = self.state.lock().unwrap();
        let candidates: Vec<MediaItem> = state
            .media_order
            .iter()
            .filter_map(|id| state.media.get(id))
            .filter(|item| filter.matches(item.processing_status, item.media_type))
            .filter(|item| {
                state
                    .enrichments
                    .values()
                    .find(|e| e.media_id == item.id)
                    .map(|row| ai_claimable(row, limits.max_attempts))
                    .unwrap_or(true)
            })
            .take(limits.batch_size.max(0) as usize)
            .cloned()
            .collect();

        let mut claims = Vec::with_capacity(candidates.len());
        for item in candidates {
            state.ensure_enrichment(item.id, item.media_type);
            if let Some(row) = state.enrichment_for_media_mut(item.id) {
                row.status = AiStatus::Processing;
                row.updated_at = Utc::now();
                claims.push(AiClaim {
                    enrichment_id: row.id,
                    media_id: item.id,
                    file_path: item.file_path.clone(),
                    media_type: item.media_type,
                });
            }
        }
        Ok(claims)
    }

    async fn claim_media_for_ai(
        &self,
        media_id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<AiClaim>, AppError> {
        let mut state = self.state.lock().unwrap();
        let Some(file_path) = state.media.get(&media_id).map(|m| m.file_path.clone()) else {
            return Ok(None);
        };
        match state.enrichment_for_media_mut(media_id) {
            Some(row) if ai_claimable(row, max_attempts) => {
                row.status = AiStatus::Processing;
                row.updated_at = Utc::now();
                Ok(Some(AiClaim {
                    enrichment_id: row.id,
                    media_id,
                    file_path,
                    media_type: row.media_type,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn complete_ai(
        &self,
        enrichment_id: Uuid,
        description: &str,
        tags: &[String],
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        match state.enrichments.get_mut(&enrichment_id) {
            Some(row) if row.status == AiStatus::Processing => {
                let now = Utc::now();
                row.description = Some(description.to_string());
                row.tags = Some(tags.to_vec());
                row.status = AiStatus::Completed;
                row.error = None;
                row.completed_at = Some(now);
                row.updated_at = now;
                Ok(())
            }
            _ => Err(AppError::NotFound(format!(
                "claimed AI enrichment {}",
                enrichment_id
            ))),
        }
    }

    async fn fail_ai(&self, enrichment_id: Uuid, error: &str) -> Result<Option<i32>, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.enrichments.get_mut(&enrichment_id) {
            Some(row) if row.status == AiStatus::Processing => {
                row.status = AiStatus::Failed;
                row.error = Some(error.to_string());
                row.attempts += 1;
                row.updated_at = Utc::now();
                Ok(Some(row.attempts))
            }
            _ => Ok(None),
        }
    }

    async fn claim_for_embedding(
        &self,
        limits: ClaimLimits,
    ) -> Result<Vec<EmbeddingClaim>, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut eligible: Vec<&mut AiEnrichment> = state
            .enrichments
            .values_mut()
            .filter(|row| embedding_claimable(row, limits.max_attempts))
            .collect();
        eligible.sort_by_key(|row| row.completed_at);

        Ok(eligible
            .into_iter()
            .take(limits.batch_size.max(0) as usize)
            .map(|row| {
                row.embedding_status = AiStatus::Processing;
                row.updated_at = Utc::now();
                embedding_claim(row)
            })
            .collect())
    }

    async fn claim_enrichment_for_embedding(
        &self,
        enrichment_id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<EmbeddingClaim>, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.enrichments.get_mut(&enrichment_id) {
            Some(row) if embedding_claimable(row, max_attempts) => {
                row.embedding_status = AiStatus::Processing;
                row.updated_at = Utc::now();
                Ok(Some(embedding_claim(row)))
            }
            _ => Ok(None),
        }
    }

    async fn complete_embedding(&self, enrichment_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        match state.enrichments.get_mut(&enrichment_id) {
            Some(row) if row.embedding_status == AiStatus::Processing => {
                let now = Utc::now();
                row.embedding_status = AiStatus::Completed;
                row.embedding_error = None;
                row.embedding_completed_at = Some(now);
                row.updated_at = now;
                Ok(())
            }
            _ => Err(AppError::NotFound(format!(
                "claimed embedding for enrichment {}",
                enrichment_id
            ))),
        }
    }

    async fn fail_embedding(
        &self,
        enrichment_id: Uuid,
        error: &str,
    ) -> Result<Option<i32>, AppError> {
        let mut state = self.state.lock().unwrap();
        match state.enrichments.get_mut(&enrichment_id) {
            Some(row) if row.embedding_status == AiStatus::Processing => {
                row.embedding_status = AiStatus::Failed;
                row.embedding_error = Some(error.to_string());
                row.embedding_attempts += 1;
                row.updated_at = Utc::now();
                Ok(Some(row.embedding_attempts))
            }
            _ => Ok(None),
        }
    }

    async fn get_by_media(&self, media_id: Uuid) -> Result<Option<AiEnrichment>, AppError> {
        Ok(self.enrichment_for(media_id))
    }

    async fn release_stale_claims(&self, older_than: Duration) -> Result<u64, AppError> {
        let cutoff: DateTime<Utc> = Utc::now() - to_chrono(older_than);
        let mut state = self.state.lock().unwrap();
        let mut released = 0;
        for row in state.enrichments.values_mut() {
            if row.updated_at >= cutoff {
                continue;
            }
            if row.status == AiStatus::Processing {
                row.status = AiStatus::Failed;
                row.error = Some(STALE_CLAIM_ERROR.to_string());
                row.attempts += 1;
                released += 1;
            } else if row.embedding_status == AiStatus::Processing {
                row.embedding_status = AiStatus::Failed;
                row.embedding_error = Some(STALE_CLAIM_ERROR.to_string());
                row.embedding_attempts += 1;
                released += 1;
            }
        }
        Ok(released)
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn enqueue(
        &self,
        kind: MediaKind,
        payload: serde_json::Value,
        policy: RetryPolicy,
    ) -> Result<MediaJob, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_enqueue {
            return Err(AppError::Internal("queue broker unreachable".to_string()));
        }
        let now = Utc::now();
        let job = MediaJob {
            id: Uuid::new_v4(),
            queue: kind.queue_name().to_string(),
            name: kind.job_name().to_string(),
            payload,
            status: JobStatus::Waiting,
            attempts_made: 0,
            max_attempts: policy.attempts as i32,
            backoff_delay_ms: policy.initial_backoff.as_millis() as i64,
            run_at: now,
            locked_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        state.job_order.push(job.id);
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim_next(&self, queue: &str) -> Result<Option<MediaJob>, AppError> {
        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        let next = state
            .job_order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job.queue == queue && job.status == JobStatus::Waiting)
            .filter(|job| job.run_at <= now)
            .min_by_key(|job| job.run_at)
            .map(|job| job.id);

        let Some(job_id) = next else {
            return Ok(None);
        };
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
        job.status = JobStatus::Active;
        job.attempts_made += 1;
        job.locked_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.locked_at = None;
            job.finished_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn schedule_retry(
        &self,
        job_id: Uuid,
        error: &str,
        delay: Duration,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            let now = Utc::now();
            job.status = JobStatus::Waiting;
            job.last_error = Some(error.to_string());
            job.run_at = now + to_chrono(delay);
            job.locked_at = None;
            job.updated_at = now;
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            let now = Utc::now();
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
            job.locked_at = None;
            job.finished_at = Some(now);
            job.updated_at = now;
        }
        Ok(())
    }

    async fn reap_stale(
        &self,
        queue: &str,
        stale_after: Duration,
    ) -> Result<ReapedJobs, AppError> {
        let now = Utc::now();
        let cutoff = now - to_chrono(stale_after);
        let mut state = self.state.lock().unwrap();
        let mut outcome = ReapedJobs::default();
        for job in state.jobs.values_mut() {
            let stale = job.queue == queue
                && job.status == JobStatus::Active
                && job.locked_at.map(|t| t < cutoff).unwrap_or(false);
            if !stale {
                continue;
            }
            job.last_error = Some(STALE_JOB_ERROR.to_string());
            job.locked_at = None;
            job.run_at = now;
            job.updated_at = now;
            if job.attempts_made >= job.max_attempts {
                job.status = JobStatus::Failed;
                job.finished_at = Some(now);
                outcome.exhausted.push(job.clone());
            } else {
                job.status = JobStatus::Waiting;
                outcome.requeued += 1;
            }
        }
        Ok(outcome)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<MediaJob>, AppError> {
        Ok(self.job(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(batch_size: i64, max_attempts: i32) -> ClaimLimits {
        ClaimLimits {
            batch_size,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_ensure_row_is_idempotent() {
        let store = InMemoryStore::new();
        let item = sample_media(MediaKind::Image, ProcessingStatus::Queued);
        store.add_media(item.clone());

        assert!(store.ensure_row(item.id, MediaKind::Image).await.unwrap());
        assert!(!store.ensure_row(item.id, MediaKind::Image).await.unwrap());
        assert_eq!(store.enrichment_count(), 1);
    }

    #[tokio::test]
    async fn test_ai_claim_marks_rows_processing_once() {
        let store = InMemoryStore::new();
        let item = sample_media(MediaKind::Image, ProcessingStatus::Queued);
        store.add_media(item.clone());

        let filter = AiClaimFilter::default();
        let first = store.claim_for_ai(&filter, limits(10, 3)).await.unwrap();
        let second = store.claim_for_ai(&filter, limits(10, 3)).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(
            store.enrichment_for(item.id).unwrap().status,
            AiStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_ai_claim_skips_rows_at_attempt_cap() {
        let store = InMemoryStore::new();
        let capped = sample_media(MediaKind::Image, ProcessingStatus::Queued);
        let retryable = sample_media(MediaKind::Image, ProcessingStatus::Queued);
        store.add_media(capped.clone());
        store.add_media(retryable.clone());
        for (id, attempts) in [(capped.id, 3), (retryable.id, 2)] {
            store.ensure_row(id, MediaKind::Image).await.unwrap();
            store.update_enrichment(id, |row| {
                row.status = AiStatus::Failed;
                row.attempts = attempts;
            });
        }

        let claims = store
            .claim_for_ai(&AiClaimFilter::default(), limits(10, 3))
            .await
            .unwrap();

        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].media_id, retryable.id);
    }

    #[tokio::test]
    async fn test_claimed_jobs_are_not_handed_out_twice() {
        let store = InMemoryStore::new();
        let job = store
            .enqueue(MediaKind::Video, serde_json::json!({}), RetryPolicy::default())
            .await
            .unwrap();

        let claimed = store.claim_next("video-processing").await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.attempts_made, 1);
        assert!(store.claim_next("video-processing").await.unwrap().is_none());
        assert!(store.claim_next("image-processing").await.unwrap().is_none());
    }
}
