use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use mediaflow_core::models::{DerivativePaths, ImageJobPayload, MediaJob, MediaKind};
use mediaflow_core::TaskError;
use mediaflow_db::MediaStore;
use mediaflow_processing::image::render_derivatives_blocking;
use mediaflow_processing::ImageDerivativeOptions;
use mediaflow_storage::keys::{placeholder_key, thumbnail_key};
use mediaflow_storage::{Storage, StorageError};

use super::{payload_media_id, record_failure, start_processing, MediaJobHandler, StartState};
use crate::broker::decode_payload;

/// Renders the WebP thumbnail and placeholder for `process-image` jobs.
pub struct ImageJobHandler {
    media: Arc<dyn MediaStore>,
    storage: Arc<dyn Storage>,
    options: ImageDerivativeOptions,
}

impl ImageJobHandler {
    pub fn new(
        media: Arc<dyn MediaStore>,
        storage: Arc<dyn Storage>,
        options: ImageDerivativeOptions,
    ) -> Self {
        Self {
            media,
            storage,
            options,
        }
    }

    async fn render(&self, payload: &ImageJobPayload) -> Result<DerivativePaths> {
        let source = self.storage.read(&payload.file_path).await.map_err(|e| match e {
            StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
                anyhow::Error::new(TaskError::unrecoverable(e))
            }
            other => anyhow::Error::new(other).context("Failed to read source image"),
        })?;

        let derivatives = render_derivatives_blocking(source, self.options).await?;
        tracing::debug!(
            width = derivatives.width,
            height = derivatives.height,
            thumbnail_bytes = derivatives.thumbnail.len(),
            placeholder_bytes = derivatives.placeholder.len(),
            "Image derivatives rendered"
        );

        let thumb = thumbnail_key(payload.media_id);
        let placeholder = placeholder_key(payload.media_id);
        self.storage
            .write(&thumb, derivatives.thumbnail)
            .await
            .context("Failed to store thumbnail")?;
        self.storage
            .write(&placeholder, derivatives.placeholder)
            .await
            .context("Failed to store placeholder")?;

        Ok(DerivativePaths::image(thumb, placeholder))
    }

    async fn run(&self, media_id: Uuid, payload: &ImageJobPayload) -> Result<()> {
        let paths = self.render(payload).await?;
        self.media
            .mark_completed(media_id, &paths)
            .await
            .context("Failed to persist image derivative paths")?;
        Ok(())
    }
}

#[async_trait]
impl MediaJobHandler for ImageJobHandler {
    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, media_id = tracing::field::Empty))]
    async fn handle(&self, job: &MediaJob) -> Result<()> {
        let payload: ImageJobPayload = decode_payload(job)?;
        tracing::Span::current().record("media_id", tracing::field::display(payload.media_id));

        if let StartState::AlreadyCompleted = start_processing(&self.media, payload.media_id).await? {
            tracing::info!("Media item already completed, skipping");
            return Ok(());
        }

        match self.run(payload.media_id, &payload).await {
            Ok(()) => {
                tracing::info!(file_path = %payload.file_path, "Image processing completed");
                Ok(())
            }
            Err(e) => Err(record_failure(&self.media, payload.media_id, e).await),
        }
    }

    async fn abandon(&self, job: &MediaJob, reason: &str) {
        if let Some(media_id) = payload_media_id(job) {
            if let Err(e) = self.media.mark_failed(media_id, reason).await {
                tracing::error!(media_id = %media_id, error = %e, "Failed to mark abandoned image item");
            }
        }
    }
}
