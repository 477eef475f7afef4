//! Status polling: a media item together with its enrichment state.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use mediaflow_core::models::{AiEnrichment, MediaItem};
use mediaflow_core::AppError;
use mediaflow_db::{EnrichmentStore, MediaStore};

#[derive(Debug, Clone, Serialize)]
pub struct MediaStatus {
    #[serde(flatten)]
    pub item: MediaItem,
    /// `None` until the AI stage has looked at the item. Always `None` for video.
    pub enrichment: Option<AiEnrichment>,
}

#[derive(Clone)]
pub struct StatusService {
    media: Arc<dyn MediaStore>,
    enrichments: Arc<dyn EnrichmentStore>,
}

impl StatusService {
    pub fn new(media: Arc<dyn MediaStore>, enrichments: Arc<dyn EnrichmentStore>) -> Self {
        Self { media, enrichments }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, media_id: Uuid) -> Result<MediaStatus, AppError> {
        let item = self
            .media
            .get(media_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("media item {}", media_id)))?;
        let enrichment = self.enrichments.get_by_media(media_id).await?;
        Ok(MediaStatus { item, enrichment })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::models::{AiStatus, MediaKind, ProcessingStatus};
    use mediaflow_db::test_helpers::{sample_media, InMemoryStore};

    fn service(store: &InMemoryStore) -> StatusService {
        StatusService::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn test_status_combines_item_and_enrichment() {
        let store = InMemoryStore::new();
        let item = sample_media(MediaKind::Image, ProcessingStatus::Failed);
        store.add_media(item.clone());
        store.ensure_row(item.id, MediaKind::Image).await.unwrap();
        store.update_enrichment(item.id, |row| {
            row.status = AiStatus::Failed;
            row.error = Some("model output does not match".to_string());
            row.attempts = 2;
        });

        let status = service(&store).get(item.id).await.unwrap();
        assert_eq!(status.item.processing_status, ProcessingStatus::Failed);
        let enrichment = status.enrichment.clone().unwrap();
        assert_eq!(enrichment.attempts, 2);
        assert_eq!(enrichment.embedding_status, AiStatus::Pending);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["processing_status"], "failed");
        assert_eq!(json["enrichment"]["status"], "failed");
    }

    #[tokio::test]
    async fn test_unknown_media_is_not_found() {
        let store = InMemoryStore::new();
        let err = service(&store).get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
