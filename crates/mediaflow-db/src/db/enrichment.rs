//! `media_ai_data` repository.
//!
//! Both claim operations mark what they return as `processing` before the
//! transaction commits. The AI claim locks the candidate media rows with
//! `FOR UPDATE ... SKIP LOCKED`, so two overlapping ticks never receive the same
//! item; the status predicates on every later write act as a compare-and-swap.

use anyhow::Context;
use async_trait::async_trait;
use mediaflow_core::models::{AiClaim, AiEnrichment, ClaimLimits, EmbeddingClaim, MediaKind};
use mediaflow_core::AppError;
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::traits::{AiClaimFilter, EnrichmentStore};

pub const STALE_CLAIM_ERROR: &str = "claim expired before completion";

#[derive(Clone)]
pub struct EnrichmentRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct AiCandidate {
    media_id: Uuid,
    file_path: String,
    media_type: MediaKind,
}

impl EnrichmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrichmentStore for EnrichmentRepository {
    #[tracing::instrument(skip(self), fields(db.table = "media_ai_data", db.operation = "insert", media_id = %media_id))]
    async fn ensure_row(&self, media_id: Uuid, media_type: MediaKind) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO media_ai_data (media_id, media_type)
            VALUES ($1, $2)
            ON CONFLICT (media_id) DO NOTHING
            "#,
        )
        .bind(media_id)
        .bind(media_type)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, filter), fields(db.table = "media_ai_data", db.operation = "claim", batch_size = limits.batch_size))]
    async fn claim_for_ai(
        &self,
        filter: &AiClaimFilter,
        limits: ClaimLimits,
    ) -> Result<Vec<AiClaim>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin AI claim transaction")?;

        let candidates: Vec<AiCandidate> = sqlx::query_as::<Postgres, AiCandidate>(
            r#"
            SELECT mi.id AS media_id, mi.file_path, mi.media_type
            FROM media_items mi
            LEFT JOIN media_ai_data mad ON mad.media_id = mi.id
            WHERE mi.processing_status::text = ANY($1)
                AND mi.media_type::text = ANY($2)
                AND (
                    mad.id IS NULL
                    OR mad.status = 'pending'
                    OR (mad.status = 'failed' AND mad.attempts < $3)
                )
            ORDER BY mi.created_at ASC
            LIMIT $4
            FOR UPDATE OF mi SKIP LOCKED
            "#,
        )
        .bind(filter.status_names())
        .bind(filter.kind_names())
        .bind(limits.max_attempts)
        .bind(limits.batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if candidates.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        for candidate in &candidates {
            sqlx::query(
                r#"
                INSERT INTO media_ai_data (media_id, media_type)
                VALUES ($1, $2)
                ON CONFLICT (media_id) DO NOTHING
                "#,
            )
            .bind(candidate.media_id)
            .bind(candidate.media_type)
            .execute(&mut *tx)
            .await?;
        }

        let media_ids: Vec<Uuid> = candidates.iter().map(|c| c.media_id).collect();
        let marked: Vec<(Uuid, Uuid)> = sqlx::query_as::<Postgres, (Uuid, Uuid)>(
            r#"
            UPDATE media_ai_data
            SET status = 'processing',
                updated_at = NOW()
            WHERE media_id = ANY($1)
                AND (status = 'pending' OR (status = 'failed' AND attempts < $2))
            RETURNING id, media_id
            "#,
        )
        .bind(&media_ids)
        .bind(limits.max_attempts)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let by_media: HashMap<Uuid, Uuid> = marked
            .into_iter()
            .map(|(id, media_id)| (media_id, id))
            .collect();

        Ok(candidates
            .into_iter()
            .filter_map(|c| {
                by_media.get(&c.media_id).map(|enrichment_id| AiClaim {
                    enrichment_id: *enrichment_id,
                    media_id: c.media_id,
                    file_path: c.file_path,
                    media_type: c.media_type,
                })
            })
            .collect())
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_ai_data", db.operation = "claim", media_id = %media_id))]
    async fn claim_media_for_ai(
        &self,
        media_id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<AiClaim>, AppError> {
        let claim = sqlx::query_as::<Postgres, AiClaim>(
            r#"
            UPDATE media_ai_data mad
            SET status = 'processing',
                updated_at = NOW()
            FROM media_items mi
            WHERE mad.media_id = $1
                AND mi.id = mad.media_id
                AND (mad.status = 'pending' OR (mad.status = 'failed' AND mad.attempts < $2))
            RETURNING mad.id AS enrichment_id, mad.media_id, mi.file_path, mad.media_type
            "#,
        )
        .bind(media_id)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claim)
    }

    #[tracing::instrument(skip(self, description, tags), fields(db.table = "media_ai_data", db.operation = "update", db.record_id = %enrichment_id))]
    async fn complete_ai(
        &self,
        enrichment_id: Uuid,
        description: &str,
        tags: &[String],
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE media_ai_data
            SET description = $2,
                tags = $3,
                status = 'completed',
                error = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(enrichment_id)
        .bind(description)
        .bind(tags)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "claimed AI enrichment {}",
                enrichment_id
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, error), fields(db.table = "media_ai_data", db.operation = "update", db.record_id = %enrichment_id))]
    async fn fail_ai(&self, enrichment_id: Uuid, error: &str) -> Result<Option<i32>, AppError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE media_ai_data
            SET status = 'failed',
                error = $2,
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING attempts
            "#,
        )
        .bind(enrichment_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_ai_data", db.operation = "claim", batch_size = limits.batch_size))]
    async fn claim_for_embedding(
        &self,
        limits: ClaimLimits,
    ) -> Result<Vec<EmbeddingClaim>, AppError> {
        let claims = sqlx::query_as::<Postgres, EmbeddingClaim>(
            r#"
            UPDATE media_ai_data
            SET embedding_status = 'processing',
                updated_at = NOW()
            WHERE id IN (
                SELECT id
                FROM media_ai_data
                WHERE status = 'completed'
                    AND embedding_status IN ('pending', 'failed')
                    AND embedding_attempts < $1
                ORDER BY completed_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id AS enrichment_id, media_id, description, tags, media_type
            "#,
        )
        .bind(limits.max_attempts)
        .bind(limits.batch_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(claims)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_ai_data", db.operation = "claim", db.record_id = %enrichment_id))]
    async fn claim_enrichment_for_embedding(
        &self,
        enrichment_id: Uuid,
        max_attempts: i32,
    ) -> Result<Option<EmbeddingClaim>, AppError> {
        let claim = sqlx::query_as::<Postgres, EmbeddingClaim>(
            r#"
            UPDATE media_ai_data
            SET embedding_status = 'processing',
                updated_at = NOW()
            WHERE id = $1
                AND status = 'completed'
                AND embedding_status IN ('pending', 'failed')
                AND embedding_attempts < $2
            RETURNING id AS enrichment_id, media_id, description, tags, media_type
            "#,
        )
        .bind(enrichment_id)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claim)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_ai_data", db.operation = "update", db.record_id = %enrichment_id))]
    async fn complete_embedding(&self, enrichment_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE media_ai_data
            SET embedding_status = 'completed',
                embedding_error = NULL,
                embedding_completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND embedding_status = 'processing'
            "#,
        )
        .bind(enrichment_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "claimed embedding for enrichment {}",
                enrichment_id
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, error), fields(db.table = "media_ai_data", db.operation = "update", db.record_id = %enrichment_id))]
    async fn fail_embedding(
        &self,
        enrichment_id: Uuid,
        error: &str,
    ) -> Result<Option<i32>, AppError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE media_ai_data
            SET embedding_status = 'failed',
                embedding_error = $2,
                embedding_attempts = embedding_attempts + 1,
                updated_at = NOW()
            WHERE id = $1 AND embedding_status = 'processing'
            RETURNING embedding_attempts
            "#,
        )
        .bind(enrichment_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_ai_data", db.operation = "select", media_id = %media_id))]
    async fn get_by_media(&self, media_id: Uuid) -> Result<Option<AiEnrichment>, AppError> {
        let row = sqlx::query_as::<Postgres, AiEnrichment>(
            "SELECT * FROM media_ai_data WHERE media_id = $1",
        )
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_ai_data", db.operation = "update"))]
    async fn release_stale_claims(&self, older_than: Duration) -> Result<u64, AppError> {
        let older_than_secs = older_than.as_secs() as i64;

        let ai = sqlx::query(
            r#"
            UPDATE media_ai_data
            SET status = 'failed',
                error = $2,
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE status = 'processing'
                AND updated_at < NOW() - ($1::bigint * INTERVAL '1 second')
            "#,
        )
        .bind(older_than_secs)
        .bind(STALE_CLAIM_ERROR)
        .execute(&self.pool)
        .await?;

        let embedding = sqlx::query(
            r#"
            UPDATE media_ai_data
            SET embedding_status = 'failed',
                embedding_error = $2,
                embedding_attempts = embedding_attempts + 1,
                updated_at = NOW()
            WHERE embedding_status = 'processing'
                AND updated_at < NOW() - ($1::bigint * INTERVAL '1 second')
            "#,
        )
        .bind(older_than_secs)
        .bind(STALE_CLAIM_ERROR)
        .execute(&self.pool)
        .await?;

        let released = ai.rows_affected() + embedding.rows_affected();
        if released > 0 {
            tracing::warn!(
                ai = ai.rows_affected(),
                embedding = embedding.rows_affected(),
                "Released stale enrichment claims"
            );
        }
        Ok(released)
    }
}
