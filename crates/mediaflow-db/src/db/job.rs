use anyhow::Context;
use async_trait::async_trait;
use mediaflow_core::models::{JobStatus, MediaJob, MediaKind, RetryPolicy};
use mediaflow_core::AppError;
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use crate::traits::{JobStore, ReapedJobs};

/// Channel name for PostgreSQL LISTEN/NOTIFY when a job is enqueued. The payload is
/// the queue name.
pub const JOB_NOTIFY_CHANNEL: &str = "mediaflow_new_job";

pub const STALE_JOB_ERROR: &str = "worker stopped while the job was active";

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    #[tracing::instrument(skip(self, payload), fields(db.table = "media_jobs", db.operation = "insert", queue = kind.queue_name()))]
    async fn enqueue(
        &self,
        kind: MediaKind,
        payload: serde_json::Value,
        policy: RetryPolicy,
    ) -> Result<MediaJob, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for job creation")?;

        let job = sqlx::query_as::<Postgres, MediaJob>(
            r#"
            INSERT INTO media_jobs (queue, name, payload, max_attempts, backoff_delay_ms)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(kind.queue_name())
        .bind(kind.job_name())
        .bind(&payload)
        .bind(policy.attempts as i32)
        .bind(policy.initial_backoff.as_millis() as i64)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        // Workers still find the job by polling if the notification is lost.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(JOB_NOTIFY_CHANNEL)
            .bind(kind.queue_name())
            .execute(&self.pool)
            .await
        {
            tracing::warn!(
                error = %e,
                job_id = %job.id,
                "Failed to send pg_notify for new job, workers will discover it via polling"
            );
        }

        Ok(job)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_jobs", db.operation = "claim"))]
    async fn claim_next(&self, queue: &str) -> Result<Option<MediaJob>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let next: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM media_jobs
            WHERE queue = $1
                AND status = 'waiting'
                AND run_at <= NOW()
            ORDER BY run_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queue)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = next else {
            tx.commit().await?;
            return Ok(None);
        };

        let job = sqlx::query_as::<Postgres, MediaJob>(
            r#"
            UPDATE media_jobs
            SET status = 'active',
                attempts_made = attempts_made + 1,
                locked_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn mark_completed(&self, job_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE media_jobs
            SET status = 'completed',
                locked_at = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, error), fields(db.table = "media_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn schedule_retry(
        &self,
        job_id: Uuid,
        error: &str,
        delay: Duration,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE media_jobs
            SET status = 'waiting',
                last_error = $2,
                run_at = NOW() + ($3::bigint * INTERVAL '1 millisecond'),
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(delay.as_millis() as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, error), fields(db.table = "media_jobs", db.operation = "update", db.record_id = %job_id))]
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE media_jobs
            SET status = 'failed',
                last_error = $2,
                locked_at = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_jobs", db.operation = "update"))]
    async fn reap_stale(
        &self,
        queue: &str,
        stale_after: Duration,
    ) -> Result<ReapedJobs, AppError> {
        let reaped = sqlx::query_as::<Postgres, MediaJob>(
            r#"
            UPDATE media_jobs
            SET status = CASE
                    WHEN attempts_made >= max_attempts THEN 'failed'::job_status
                    ELSE 'waiting'::job_status
                END,
                finished_at = CASE WHEN attempts_made >= max_attempts THEN NOW() END,
                last_error = $3,
                locked_at = NULL,
                run_at = NOW(),
                updated_at = NOW()
            WHERE queue = $1
                AND status = 'active'
                AND locked_at < NOW() - ($2::bigint * INTERVAL '1 second')
            RETURNING *
            "#,
        )
        .bind(queue)
        .bind(stale_after.as_secs() as i64)
        .bind(STALE_JOB_ERROR)
        .fetch_all(&self.pool)
        .await?;

        let (exhausted, requeued): (Vec<MediaJob>, Vec<MediaJob>) = reaped
            .into_iter()
            .partition(|job| job.status == JobStatus::Failed);
        let outcome = ReapedJobs {
            requeued: requeued.len() as u64,
            exhausted,
        };

        if outcome.total() > 0 {
            tracing::warn!(
                queue = queue,
                requeued = outcome.requeued,
                failed = outcome.exhausted.len(),
                "Reaped stale active jobs"
            );
        }
        Ok(outcome)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_jobs", db.operation = "select", db.record_id = %job_id))]
    async fn get(&self, job_id: Uuid) -> Result<Option<MediaJob>, AppError> {
        let job = sqlx::query_as::<Postgres, MediaJob>("SELECT * FROM media_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }
}
