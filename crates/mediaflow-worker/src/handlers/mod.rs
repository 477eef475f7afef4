//! Job handlers
//!
//! A [`MediaJobHandler`] owns one queue. The pool calls [`MediaJobHandler::handle`]
//! for every claimed job and maps the result onto the job's retry policy; errors
//! wrapping an unrecoverable [`mediaflow_core::TaskError`] fail the job at once.

mod image;
mod video;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use mediaflow_core::models::{MediaJob, MediaKind};
use mediaflow_core::TaskError;
use mediaflow_db::MediaStore;

pub use image::ImageJobHandler;
pub use video::VideoJobHandler;

#[async_trait]
pub trait MediaJobHandler: Send + Sync {
    fn kind(&self) -> MediaKind;

    /// Process one claimed job end to end, media item status writes included.
    async fn handle(&self, job: &MediaJob) -> Result<()>;

    /// Called when the pool gave up waiting on [`handle`](Self::handle), so the
    /// item does not stay `processing`.
    async fn abandon(&self, job: &MediaJob, reason: &str);
}

/// Outcome of moving an item to `processing` before any work starts.
#[derive(Debug)]
pub(crate) enum StartState {
    Started,
    AlreadyCompleted,
}

pub(crate) async fn start_processing(
    media: &Arc<dyn MediaStore>,
    media_id: Uuid,
) -> Result<StartState> {
    if media.mark_processing(media_id).await? {
        return Ok(StartState::Started);
    }
    match media.get(media_id).await? {
        Some(_) => Ok(StartState::AlreadyCompleted),
        None => Err(TaskError::unrecoverable(anyhow::anyhow!(
            "media item {} does not exist",
            media_id
        ))
        .into()),
    }
}

/// Records `err` on the media item and hands it back unchanged, so the pool still
/// sees whether it was recoverable.
pub(crate) async fn record_failure(
    media: &Arc<dyn MediaStore>,
    media_id: Uuid,
    err: anyhow::Error,
) -> anyhow::Error {
    let message = match err.downcast_ref::<TaskError>() {
        Some(task_error) => format!("{:#}", task_error.inner()),
        None => format!("{:#}", err),
    };
    if let Err(e) = media.mark_failed(media_id, &message).await {
        tracing::error!(media_id = %media_id, error = %e, "Failed to record processing failure");
    }
    err
}

/// Media id of a job whose payload may not decode.
pub(crate) fn payload_media_id(job: &MediaJob) -> Option<Uuid> {
    job.payload
        .get("media_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::models::ProcessingStatus;
    use mediaflow_db::test_helpers::{sample_media, InMemoryStore};

    #[tokio::test]
    async fn test_start_processing_states() {
        let store = InMemoryStore::new();
        let media: Arc<dyn MediaStore> = Arc::new(store.clone());

        let queued = sample_media(MediaKind::Image, ProcessingStatus::Queued);
        let done = sample_media(MediaKind::Image, ProcessingStatus::Completed);
        store.add_media(queued.clone());
        store.add_media(done.clone());

        assert!(matches!(
            start_processing(&media, queued.id).await.unwrap(),
            StartState::Started
        ));
        assert!(matches!(
            start_processing(&media, done.id).await.unwrap(),
            StartState::AlreadyCompleted
        ));

        let err = start_processing(&media, Uuid::new_v4()).await.unwrap_err();
        assert!(TaskError::is_unrecoverable_error(&err));
    }

    #[tokio::test]
    async fn test_record_failure_keeps_task_error() {
        let store = InMemoryStore::new();
        let media: Arc<dyn MediaStore> = Arc::new(store.clone());
        let item = sample_media(MediaKind::Image, ProcessingStatus::Processing);
        store.add_media(item.clone());

        let err: anyhow::Error = TaskError::unrecoverable(anyhow::anyhow!("missing source")).into();
        let err = record_failure(&media, item.id, err).await;

        assert!(TaskError::is_unrecoverable_error(&err));
        let item = store.media(item.id).unwrap();
        assert_eq!(item.processing_status, ProcessingStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some("missing source"));
    }
}
