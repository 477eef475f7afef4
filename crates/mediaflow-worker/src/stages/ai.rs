use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use mediaflow_core::models::{AiClaim, ClaimLimits, MediaKind};
use mediaflow_core::Config;
use mediaflow_db::{AiClaimFilter, EnrichmentStore};
use mediaflow_services::{with_timeout, StructuredDescription, VisionModel, IMAGE_EXTRACT_PROMPT};
use mediaflow_storage::Storage;

use super::StageReport;

#[derive(Debug, Clone)]
pub struct AiStageConfig {
    pub batch_size: i64,
    pub max_attempts: i32,
    /// Claims older than this are treated as lost and released before each batch.
    pub stale_claim: Duration,
    pub model_timeout: Duration,
}

impl Default for AiStageConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 3,
            stale_claim: Duration::from_secs(900),
            model_timeout: Duration::from_secs(120),
        }
    }
}

impl AiStageConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.cron_batch_size,
            max_attempts: config.max_ai_attempts,
            stale_claim: Duration::from_secs(config.stale_claim_secs.max(0) as u64),
            model_timeout: config.model_timeout(),
        }
    }
}

/// Describes claimed images with the vision model and stores description and tags.
pub struct AiStage {
    enrichments: Arc<dyn EnrichmentStore>,
    storage: Arc<dyn Storage>,
    model: Arc<dyn VisionModel>,
    filter: AiClaimFilter,
    config: AiStageConfig,
}

impl AiStage {
    pub fn new(
        enrichments: Arc<dyn EnrichmentStore>,
        storage: Arc<dyn Storage>,
        model: Arc<dyn VisionModel>,
        config: AiStageConfig,
    ) -> Self {
        Self {
            enrichments,
            storage,
            model,
            filter: AiClaimFilter::default(),
            config,
        }
    }

    fn limits(&self) -> ClaimLimits {
        ClaimLimits {
            batch_size: self.config.batch_size,
            max_attempts: self.config.max_attempts,
        }
    }

    /// Releases stale claims, claims one batch and processes it sequentially.
    #[tracing::instrument(skip(self), fields(stage = "ai"))]
    pub async fn run_batch(&self) -> Result<StageReport> {
        let released = self
            .enrichments
            .release_stale_claims(self.config.stale_claim)
            .await
            .context("Failed to release stale claims")?;
        if released > 0 {
            tracing::warn!(released, "Released stale enrichment claims");
        }

        let claims = self
            .enrichments
            .claim_for_ai(&self.filter, self.limits())
            .await
            .context("Failed to claim media for AI enrichment")?;

        let mut report = StageReport {
            claimed: claims.len(),
            ..Default::default()
        };
        if claims.is_empty() {
            tracing::debug!("No media waiting for AI enrichment");
            return Ok(report);
        }

        for claim in &claims {
            report.record(self.process(claim).await);
        }

        tracing::info!(
            claimed = report.claimed,
            completed = report.completed,
            failed = report.failed,
            "AI enrichment batch finished"
        );
        Ok(report)
    }

    /// Ensures the enrichment row of one item exists and claims it, whatever the
    /// item's processing status.
    pub async fn claim_one(&self, media_id: Uuid, kind: MediaKind) -> Result<Option<AiClaim>> {
        self.enrichments.ensure_row(media_id, kind).await?;
        Ok(self
            .enrichments
            .claim_media_for_ai(media_id, self.config.max_attempts)
            .await?)
    }

    /// Runs one claimed item to `completed` or `failed`. Returns true on completion.
    #[tracing::instrument(skip(self, claim), fields(media_id = %claim.media_id, enrichment_id = %claim.enrichment_id))]
    pub async fn process(&self, claim: &AiClaim) -> bool {
        let result = match self.describe(claim).await {
            Ok(description) => self
                .enrichments
                .complete_ai(claim.enrichment_id, &description.desc, &description.tags)
                .await
                .map(|()| description)
                .context("Failed to store AI description"),
            Err(e) => Err(e),
        };

        match result {
            Ok(description) => {
                tracing::info!(tags = description.tags.len(), "AI enrichment completed");
                true
            }
            Err(e) => {
                let message = format!("{:#}", e);
                match self.enrichments.fail_ai(claim.enrichment_id, &message).await {
                    Ok(Some(attempts)) if attempts >= self.config.max_attempts => {
                        tracing::warn!(
                            attempts,
                            error = %message,
                            "AI enrichment failed and reached its attempt cap"
                        );
                    }
                    Ok(Some(attempts)) => {
                        tracing::error!(attempts, error = %message, "AI enrichment failed");
                    }
                    Ok(None) => {
                        tracing::warn!(error = %message, "AI enrichment failed on a row no longer claimed");
                    }
                    Err(db_err) => {
                        tracing::error!(error = %db_err, "Failed to record AI enrichment failure");
                    }
                }
                false
            }
        }
    }

    async fn describe(&self, claim: &AiClaim) -> Result<StructuredDescription> {
        let image = self
            .storage
            .read(&claim.file_path)
            .await
            .with_context(|| format!("Failed to read {}", claim.file_path))?;

        let raw = with_timeout(
            self.config.model_timeout,
            "vision model",
            self.model.describe_image(IMAGE_EXTRACT_PROMPT, &image),
        )
        .await?;

        Ok(StructuredDescription::parse(&raw)?)
    }
}
