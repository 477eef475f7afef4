//! Model and vector index abstractions.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Vision model that answers a text prompt about one image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run `prompt` against the raw image bytes and return the model's text output.
    async fn describe_image(&self, prompt: &str, image: &[u8]) -> Result<String>;
}

/// Text embedding model.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// One point written to the vector index; `id` is the enrichment row id.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection with the configured size and cosine distance if it is missing.
    async fn ensure_collection(&self) -> Result<()>;

    /// Insert or replace the point with the same id.
    async fn upsert(&self, point: VectorPoint) -> Result<()>;
}

/// Await `fut` for at most `limit`, turning an elapsed deadline into an error naming `what`.
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} timed out after {}s", what, limit.as_secs_f64())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_through_result() {
        let value = with_timeout(Duration::from_secs(1), "call", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_with_timeout_reports_elapsed_deadline() {
        let err = with_timeout(Duration::from_millis(10), "vision model", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("vision model timed out"));
    }
}
