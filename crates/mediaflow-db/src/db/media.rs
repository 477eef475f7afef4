use async_trait::async_trait;
use mediaflow_core::models::{DerivativePaths, MediaItem, NewMediaItem};
use mediaflow_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::traits::MediaStore;

#[derive(Clone)]
pub struct MediaRepository {
    pool: PgPool,
}

impl MediaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaStore for MediaRepository {
    #[tracing::instrument(skip(self, item), fields(db.table = "media_items", db.operation = "insert", media_type = %item.mime.kind()))]
    async fn insert(&self, item: NewMediaItem) -> Result<MediaItem, AppError> {
        let row = sqlx::query_as::<Postgres, MediaItem>(
            r#"
            INSERT INTO media_items (
                owner_id, file_path, file_name, mime_type, media_type,
                file_size, width, height, duration_secs, rotation,
                codec, processing_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(&item.owner_id)
        .bind(&item.file_path)
        .bind(&item.file_name)
        .bind(item.mime.as_str())
        .bind(item.mime.kind())
        .bind(item.file_size)
        .bind(item.width)
        .bind(item.height)
        .bind(item.duration_secs)
        .bind(item.rotation)
        .bind(&item.codec)
        .bind(item.processing_status)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "select", db.record_id = %id))]
    async fn get(&self, id: Uuid) -> Result<Option<MediaItem>, AppError> {
        let row = sqlx::query_as::<Postgres, MediaItem>("SELECT * FROM media_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    #[tracing::instrument(skip(self), fields(db.table = "media_items", db.operation = "update", db.record_id = %id))]
    async fn mark_processing(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE media_items
            SET processing_status = 'processing',
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND processing_status <> 'completed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, paths), fields(db.table = "media_items", db.operation = "update", db.record_id = %id))]
    async fn mark_completed(&self, id: Uuid, paths: &DerivativePaths) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE media_items
            SET processing_status = 'completed',
                thumbnail_path = COALESCE($2, thumbnail_path),
                placeholder_path = COALESCE($3, placeholder_path),
                hls_dir = COALESCE($4, hls_dir),
                video_thumb_path = COALESCE($5, video_thumb_path),
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&paths.thumbnail_path)
        .bind(&paths.placeholder_path)
        .bind(&paths.hls_dir)
        .bind(&paths.video_thumb_path)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("media item {}", id)));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, message), fields(db.table = "media_items", db.operation = "update", db.record_id = %id))]
    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE media_items
            SET processing_status = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1 AND processing_status <> 'completed'
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
