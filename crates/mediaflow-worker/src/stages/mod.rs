//! Cron stages: AI description and embedding.
//!
//! Both stages claim a batch with an atomic claim-and-mark, then process the claimed
//! rows one at a time. A failing row is recorded on the row and never aborts the batch.

mod ai;
mod embedding;

use anyhow::Result;
use uuid::Uuid;

use mediaflow_core::models::MediaKind;
use mediaflow_core::AppError;
use mediaflow_db::MediaStore;

pub use ai::{AiStage, AiStageConfig};
pub use embedding::{EmbeddingStage, EmbeddingStageConfig};

/// Counts for one stage run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StageReport {
    fn record(&mut self, completed: bool) {
        if completed {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Result of [`enrich_media_now`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineOutcome {
    /// Video items are never enriched.
    SkippedVideo,
    /// The row is already being processed, completed, or at its attempt cap.
    NotClaimable,
    AiFailed,
    Described { embedded: bool },
}

/// Runs the AI stage and, when it succeeds, the embedding stage for a single media
/// item right away instead of waiting for the next ticks. Uses the same claims as the
/// cron stages, so it never races them.
#[tracing::instrument(skip(media, ai, embedding), fields(media_id = %media_id))]
pub async fn enrich_media_now(
    media: &dyn MediaStore,
    ai: &AiStage,
    embedding: &EmbeddingStage,
    media_id: Uuid,
) -> Result<InlineOutcome> {
    let item = media
        .get(media_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("media item {}", media_id)))?;

    if item.media_type == MediaKind::Video {
        tracing::debug!("Video items are not enriched");
        return Ok(InlineOutcome::SkippedVideo);
    }

    let Some(claim) = ai.claim_one(media_id, item.media_type).await? else {
        return Ok(InlineOutcome::NotClaimable);
    };
    if !ai.process(&claim).await {
        return Ok(InlineOutcome::AiFailed);
    }

    let embedded = match embedding.claim_one(claim.enrichment_id).await? {
        Some(row) => embedding.process(&row).await,
        None => false,
    };
    Ok(InlineOutcome::Described { embedded })
}
