//! Upload intake: store the original, record the media item, enqueue its job.
//!
//! Every step after the file lands in storage undoes the earlier ones on failure, so
//! a rejected or unqueueable upload leaves no orphan file and no item stuck `queued`.

use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use mediaflow_core::models::{
    DeclaredMime, ImageJobPayload, ImageMimeType, MediaItem, NewMediaItem, ProcessingStatus,
    VideoJobPayload, VideoMimeType,
};
use mediaflow_core::{AppError, Config};
use mediaflow_db::MediaStore;
use mediaflow_processing::{VideoProbe, VideoTranscoder};
use mediaflow_storage::keys::{image_original_key, video_original_key};
use mediaflow_storage::Storage;

use crate::broker::QueueBroker;

/// An upload as received from the caller.
#[derive(Debug, Clone)]
pub struct Upload {
    pub owner_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

pub struct IntakeService {
    media: Arc<dyn MediaStore>,
    storage: Arc<dyn Storage>,
    broker: QueueBroker,
    transcoder: VideoTranscoder,
    max_video_duration_secs: f64,
}

fn original_extension(mime: DeclaredMime) -> &'static str {
    match mime {
        DeclaredMime::Image(ImageMimeType::Jpeg) => "jpg",
        DeclaredMime::Image(ImageMimeType::Png) => "png",
        DeclaredMime::Image(ImageMimeType::Webp) => "webp",
        DeclaredMime::Image(ImageMimeType::Gif) => "gif",
        DeclaredMime::Video(VideoMimeType::Mp4) => "mp4",
        DeclaredMime::Video(VideoMimeType::QuickTime) => "mov",
        DeclaredMime::Video(VideoMimeType::Webm) => "webm",
        DeclaredMime::Video(VideoMimeType::Matroska) => "mkv",
    }
}

/// Last path component of a client-supplied file name.
fn sanitize_file_name(name: &str) -> String {
    Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string()
}

impl IntakeService {
    pub fn new(
        media: Arc<dyn MediaStore>,
        storage: Arc<dyn Storage>,
        broker: QueueBroker,
        transcoder: VideoTranscoder,
        max_video_duration_secs: f64,
    ) -> Self {
        Self {
            media,
            storage,
            broker,
            transcoder,
            max_video_duration_secs,
        }
    }

    pub fn from_config(
        media: Arc<dyn MediaStore>,
        storage: Arc<dyn Storage>,
        broker: QueueBroker,
        transcoder: VideoTranscoder,
        config: &Config,
    ) -> Self {
        Self::new(media, storage, broker, transcoder, config.max_video_duration_secs)
    }

    /// Stores the upload, records it as `queued` and enqueues its processing job.
    #[tracing::instrument(skip(self, upload), fields(owner_id = %upload.owner_id, mime_type = %upload.mime_type, file_size = upload.data.len()))]
    pub async fn submit(&self, upload: Upload) -> Result<MediaItem, AppError> {
        let mime = DeclaredMime::parse(&upload.mime_type)?;
        if upload.data.is_empty() {
            return Err(AppError::InvalidInput("Uploaded file is empty".to_string()));
        }

        let file_id = Uuid::new_v4();
        let extension = original_extension(mime);
        let key = match mime {
            DeclaredMime::Image(_) => image_original_key(file_id, extension),
            DeclaredMime::Video(_) => video_original_key(file_id, extension),
        };
        let file_size = upload.data.len() as i64;

        self.storage.write(&key, upload.data).await.map_err(|e| {
            tracing::error!(error = %e, storage_key = %key, "Failed to store upload");
            AppError::Storage(format!("Failed to store upload: {}", e))
        })?;

        let probe = match mime {
            DeclaredMime::Video(_) => Some(self.probe_video(&key).await?),
            DeclaredMime::Image(_) => None,
        };

        let new_item = NewMediaItem {
            owner_id: upload.owner_id,
            file_path: key.clone(),
            file_name: sanitize_file_name(&upload.file_name),
            mime,
            file_size: Some(file_size),
            width: probe.as_ref().map(|p| p.width as i32),
            height: probe.as_ref().map(|p| p.height as i32),
            duration_secs: probe.as_ref().map(|p| p.duration_secs),
            rotation: probe.as_ref().and_then(|p| p.rotation).map(|r| r as i32),
            codec: probe.map(|p| p.codec),
            processing_status: ProcessingStatus::Queued,
        };

        let item = match self.media.insert(new_item).await {
            Ok(item) => item,
            Err(e) => {
                self.discard(&key).await;
                return Err(e);
            }
        };

        let enqueued = match mime {
            DeclaredMime::Image(mime_type) => self
                .broker
                .enqueue(&ImageJobPayload {
                    media_id: item.id,
                    file_path: key.clone(),
                    mime_type,
                })
                .await
                .map(|job| job.id),
            DeclaredMime::Video(mime_type) => self
                .broker
                .enqueue(&VideoJobPayload {
                    media_id: item.id,
                    file_path: key.clone(),
                    mime_type,
                })
                .await
                .map(|job| job.id),
        };

        match enqueued {
            Ok(job_id) => {
                tracing::info!(media_id = %item.id, job_id = %job_id, storage_key = %key, "Upload accepted");
                Ok(item)
            }
            Err(e) => {
                tracing::error!(media_id = %item.id, error = %e, "Failed to enqueue processing job");
                if let Err(mark_err) = self
                    .media
                    .mark_failed(item.id, &format!("Failed to enqueue processing job: {}", e))
                    .await
                {
                    tracing::error!(media_id = %item.id, error = %mark_err, "Failed to mark media item failed");
                }
                self.discard(&key).await;
                Err(e)
            }
        }
    }

    async fn probe_video(&self, key: &str) -> Result<VideoProbe, AppError> {
        let probed = match self.storage.local_path(key) {
            Ok(path) => self.transcoder.probe(&path).await,
            Err(e) => Err(e.into()),
        };

        let probe = match probed {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!(error = %e, "Rejecting video that could not be probed");
                self.discard(key).await;
                return Err(AppError::InvalidInput(format!(
                    "Could not read video metadata: {}",
                    e
                )));
            }
        };

        if probe.duration_secs > self.max_video_duration_secs {
            self.discard(key).await;
            return Err(AppError::InvalidInput(format!(
                "Video is {:.1}s long, the maximum is {:.0}s",
                probe.duration_secs, self.max_video_duration_secs
            )));
        }
        Ok(probe)
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(error = %e, storage_key = %key, "Failed to remove rejected upload");
        }
    }
}
