use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use mediaflow_core::models::{DerivativePaths, MediaJob, MediaKind, VideoJobPayload};
use mediaflow_core::TaskError;
use mediaflow_db::MediaStore;
use mediaflow_processing::VideoTranscoder;
use mediaflow_storage::keys::{hls_dir_key, video_poster_key};
use mediaflow_storage::Storage;

use super::{payload_media_id, record_failure, start_processing, MediaJobHandler, StartState};
use crate::broker::decode_payload;

/// Produces the HLS bundle and poster frame for `process-video` jobs.
pub struct VideoJobHandler {
    media: Arc<dyn MediaStore>,
    storage: Arc<dyn Storage>,
    transcoder: VideoTranscoder,
}

impl VideoJobHandler {
    pub fn new(
        media: Arc<dyn MediaStore>,
        storage: Arc<dyn Storage>,
        transcoder: VideoTranscoder,
    ) -> Self {
        Self {
            media,
            storage,
            transcoder,
        }
    }

    async fn render(&self, payload: &VideoJobPayload) -> Result<DerivativePaths> {
        if !self.storage.exists(&payload.file_path).await? {
            return Err(TaskError::unrecoverable(anyhow::anyhow!(
                "source video {} not found",
                payload.file_path
            ))
            .into());
        }
        let input = self.storage.local_path(&payload.file_path)?;

        let hls_dir = hls_dir_key(payload.media_id);
        let poster = video_poster_key(payload.media_id);
        let output_dir = self
            .storage
            .prepare_dir(&hls_dir)
            .await
            .context("Failed to prepare HLS directory")?;
        let poster_path = self.storage.local_path(&poster)?;

        let rendition = self
            .transcoder
            .render(&input, &output_dir, &poster_path)
            .await?;
        tracing::debug!(
            duration_secs = rendition.probe.duration_secs,
            variants = rendition.variant_count,
            poster_at_secs = rendition.poster_at_secs,
            "Video rendition written"
        );

        Ok(DerivativePaths::video(hls_dir, poster))
    }
}

#[async_trait]
impl MediaJobHandler for VideoJobHandler {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, media_id = tracing::field::Empty))]
    async fn handle(&self, job: &MediaJob) -> Result<()> {
        let payload: VideoJobPayload = decode_payload(job)?;
        tracing::Span::current().record("media_id", tracing::field::display(payload.media_id));

        if let StartState::AlreadyCompleted = start_processing(&self.media, payload.media_id).await? {
            tracing::info!("Media item already completed, skipping");
            return Ok(());
        }

        let result = match self.render(&payload).await {
            Ok(paths) => self
                .media
                .mark_completed(payload.media_id, &paths)
                .await
                .context("Failed to persist video derivative paths"),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::info!(mime_type = payload.mime_type.as_str(), "Video processing completed");
                Ok(())
            }
            Err(e) => Err(record_failure(&self.media, payload.media_id, e).await),
        }
    }

    async fn abandon(&self, job: &MediaJob, reason: &str) {
        if let Some(media_id) = payload_media_id(job) {
            if let Err(e) = self.media.mark_failed(media_id, reason).await {
                tracing::error!(media_id = %media_id, error = %e, "Failed to mark abandoned video item");
            }
        }
    }
}
