use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use mediaflow_core::models::{ClaimLimits, EmbeddingClaim};
use mediaflow_core::Config;
use mediaflow_db::EnrichmentStore;
use mediaflow_services::{ensure_dimension, with_timeout, EmbeddingModel, VectorIndex, VectorPoint};

use super::StageReport;

#[derive(Debug, Clone)]
pub struct EmbeddingStageConfig {
    pub batch_size: i64,
    pub max_attempts: i32,
    pub dimension: usize,
    pub timeout: Duration,
}

impl Default for EmbeddingStageConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
            dimension: 768,
            timeout: Duration::from_secs(120),
        }
    }
}

impl EmbeddingStageConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.cron_batch_size,
            max_attempts: config.max_embedding_attempts,
            dimension: config.embedding_dim,
            timeout: config.model_timeout(),
        }
    }
}

/// Embeds stored descriptions and upserts them into the vector index.
pub struct EmbeddingStage {
    enrichments: Arc<dyn EnrichmentStore>,
    model: Arc<dyn EmbeddingModel>,
    index: Arc<dyn VectorIndex>,
    config: EmbeddingStageConfig,
}

impl EmbeddingStage {
    pub fn new(
        enrichments: Arc<dyn EnrichmentStore>,
        model: Arc<dyn EmbeddingModel>,
        index: Arc<dyn VectorIndex>,
        config: EmbeddingStageConfig,
    ) -> Self {
        Self {
            enrichments,
            model,
            index,
            config,
        }
    }

    #[tracing::instrument(skip(self), fields(stage = "embedding"))]
    pub async fn run_batch(&self) -> Result<StageReport> {
        let claims = self
            .enrichments
            .claim_for_embedding(ClaimLimits {
                batch_size: self.config.batch_size,
                max_attempts: self.config.max_attempts,
            })
            .await
            .context("Failed to claim enrichments for embedding")?;

        let mut report = StageReport {
            claimed: claims.len(),
            ..Default::default()
        };
        if claims.is_empty() {
            tracing::debug!("No descriptions waiting for embedding");
            return Ok(report);
        }

        for claim in &claims {
            report.record(self.process(claim).await);
        }

        tracing::info!(
            claimed = report.claimed,
            completed = report.completed,
            failed = report.failed,
            "Embedding batch finished"
        );
        Ok(report)
    }

    pub async fn claim_one(&self, enrichment_id: Uuid) -> Result<Option<EmbeddingClaim>> {
        Ok(self
            .enrichments
            .claim_enrichment_for_embedding(enrichment_id, self.config.max_attempts)
            .await?)
    }

    /// Runs one claimed row to embedding `completed` or `failed`. Returns true on completion.
    #[tracing::instrument(skip(self, claim), fields(media_id = %claim.media_id, enrichment_id = %claim.enrichment_id))]
    pub async fn process(&self, claim: &EmbeddingClaim) -> bool {
        let result = match self.embed_and_upsert(claim).await {
            Ok(()) => self
                .enrichments
                .complete_embedding(claim.enrichment_id)
                .await
                .context("Failed to mark embedding completed"),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::info!(model = self.model.model_name(), "Embedding stored");
                true
            }
            Err(e) => {
                let message = format!("{:#}", e);
                match self
                    .enrichments
                    .fail_embedding(claim.enrichment_id, &message)
                    .await
                {
                    Ok(Some(attempts)) if attempts >= self.config.max_attempts => {
                        tracing::warn!(
                            attempts,
                            error = %message,
                            "Embedding failed and reached its attempt cap"
                        );
                    }
                    Ok(Some(attempts)) => {
                        tracing::error!(attempts, error = %message, "Embedding failed");
                    }
                    Ok(None) => {
                        tracing::warn!(error = %message, "Embedding failed on a row no longer claimed");
                    }
                    Err(db_err) => {
                        tracing::error!(error = %db_err, "Failed to record embedding failure");
                    }
                }
                false
            }
        }
    }

    async fn embed_and_upsert(&self, claim: &EmbeddingClaim) -> Result<()> {
        let description = claim
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| anyhow!("enrichment has no description to embed"))?;

        let vector = with_timeout(
            self.config.timeout,
            "embedding model",
            self.model.embed(description),
        )
        .await?;
        let vector = ensure_dimension(vector, self.config.dimension)?;

        let point = VectorPoint {
            id: claim.enrichment_id,
            vector,
            payload: serde_json::json!({
                "description": description,
                "tags": claim.tags.clone().unwrap_or_default(),
                "media_type": claim.media_type,
            }),
        };
        with_timeout(self.config.timeout, "vector index upsert", self.index.upsert(point)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::models::{AiStatus, MediaKind, ProcessingStatus};
    use mediaflow_db::test_helpers::{sample_media, InMemoryStore};
    use mediaflow_services::test_helpers::{InMemoryVectorIndex, ScriptedEmbeddingModel};

    async fn seed(store: &InMemoryStore, status: AiStatus, description: Option<&str>) -> Uuid {
        let item = sample_media(MediaKind::Image, ProcessingStatus::Completed);
        store.add_media(item.clone());
        store.ensure_row(item.id, MediaKind::Image).await.unwrap();
        store.update_enrichment(item.id, |row| {
            row.status = status;
            row.description = description.map(str::to_string);
            row.tags = Some(vec!["kite".to_string(), "beach".to_string()]);
        });
        item.id
    }

    fn stage(
        store: &InMemoryStore,
        model: ScriptedEmbeddingModel,
        index: &InMemoryVectorIndex,
    ) -> EmbeddingStage {
        EmbeddingStage::new(
            Arc::new(store.clone()),
            Arc::new(model),
            Arc::new(index.clone()),
            EmbeddingStageConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_embeds_completed_rows_only() {
        let store = InMemoryStore::new();
        let index = InMemoryVectorIndex::new();
        let done = seed(&store, AiStatus::Completed, Some("A red kite over a beach")).await;
        let pending = seed(&store, AiStatus::Pending, None).await;
        let failed = seed(&store, AiStatus::Failed, Some("stale")).await;

        let report = stage(&store, ScriptedEmbeddingModel::new(768), &index)
            .run_batch()
            .await
            .unwrap();

        assert_eq!(report, StageReport { claimed: 1, completed: 1, failed: 0 });
        let row = store.enrichment_for(done).unwrap();
        assert_eq!(row.embedding_status, AiStatus::Completed);
        assert!(row.embedding_completed_at.is_some());

        let point = index.point(row.id).unwrap();
        assert_eq!(point.vector.len(), 768);
        assert_eq!(point.payload["description"], "A red kite over a beach");
        assert_eq!(point.payload["tags"], serde_json::json!(["kite", "beach"]));
        assert_eq!(point.payload["media_type"], "image");

        for id in [pending, failed] {
            assert_eq!(
                store.enrichment_for(id).unwrap().embedding_status,
                AiStatus::Pending
            );
        }
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_the_row() {
        let store = InMemoryStore::new();
        let index = InMemoryVectorIndex::new();
        let id = seed(&store, AiStatus::Completed, Some("desc")).await;

        let report = stage(&store, ScriptedEmbeddingModel::new(384), &index)
            .run_batch()
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        let row = store.enrichment_for(id).unwrap();
        assert_eq!(row.embedding_status, AiStatus::Failed);
        assert_eq!(row.embedding_attempts, 1);
        assert!(row.embedding_error.unwrap().contains("384"));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_missing_description_is_a_failed_attempt() {
        let store = InMemoryStore::new();
        let index = InMemoryVectorIndex::new();
        let id = seed(&store, AiStatus::Completed, None).await;
        let model = ScriptedEmbeddingModel::new(768);

        stage(&store, model.clone(), &index).run_batch().await.unwrap();

        let row = store.enrichment_for(id).unwrap();
        assert_eq!(row.embedding_status, AiStatus::Failed);
        assert!(row.embedding_error.unwrap().contains("no description"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_capped_rows_are_left_alone() {
        let store = InMemoryStore::new();
        let index = InMemoryVectorIndex::new();
        let id = seed(&store, AiStatus::Completed, Some("desc")).await;
        store.update_enrichment(id, |row| {
            row.embedding_status = AiStatus::Failed;
            row.embedding_attempts = 3;
        });

        let report = stage(&store, ScriptedEmbeddingModel::new(768), &index)
            .run_batch()
            .await
            .unwrap();

        assert_eq!(report.claimed, 0);
        assert!(index.is_empty());
    }
}
