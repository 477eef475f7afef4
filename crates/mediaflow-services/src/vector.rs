//! Qdrant vector index.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::time::Duration;

use crate::traits::{VectorIndex, VectorPoint};

/// Reject vectors whose length differs from the collection size.
pub fn ensure_dimension(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>> {
    if vector.len() != expected {
        return Err(anyhow!(
            "embedding has {} dimensions, collection expects {}",
            vector.len(),
            expected
        ));
    }
    Ok(vector)
}

/// Point keyed by the enrichment row id (as a UUID point id) with a JSON payload.
fn to_point_struct(point: VectorPoint, dimension: usize) -> Result<PointStruct> {
    let vector = ensure_dimension(point.vector, dimension)?;
    let payload = Payload::try_from(point.payload).context("Point payload must be a JSON object")?;
    Ok(PointStruct::new(point.id.to_string(), vector, payload))
}

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    /// `url` is the gRPC endpoint (port 6334 by default).
    pub fn new(
        url: &str,
        collection: String,
        dimension: usize,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let builder = Qdrant::from_url(url).timeout(timeout);
        let client = match api_key {
            Some(key) => builder.api_key(key).build(),
            None => builder.build(),
        }
        .context("Failed to create Qdrant client")?;

        Ok(Self {
            client,
            collection,
            dimension,
        })
    }

    pub fn from_config(config: &mediaflow_core::Config) -> Result<Self> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_collection.clone(),
            config.embedding_dim,
            config.qdrant_api_key.clone(),
            config.model_timeout(),
        )
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    #[tracing::instrument(skip(self), fields(collection = %self.collection))]
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .context("Failed to reach Qdrant")?;
        if exists {
            tracing::debug!("Qdrant collection already exists");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                ),
            )
            .await
            .context("Failed to create Qdrant collection")?;

        tracing::info!(dimension = self.dimension, "Qdrant collection created");
        Ok(())
    }

    #[tracing::instrument(skip(self, point), fields(collection = %self.collection, point_id = %point.id))]
    async fn upsert(&self, point: VectorPoint) -> Result<()> {
        let point = to_point_struct(point, self.dimension)?;
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .context("Qdrant upsert failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::{PointId, Value};
    use uuid::Uuid;

    fn sample_point(dimension: usize) -> VectorPoint {
        VectorPoint {
            id: Uuid::nil(),
            vector: vec![0.5; dimension],
            payload: serde_json::json!({"description": "d", "tags": ["t"], "media_type": "image"}),
        }
    }

    #[test]
    fn test_ensure_dimension() {
        assert!(ensure_dimension(vec![0.0; 768], 768).is_ok());
        let err = ensure_dimension(vec![0.0; 384], 768).unwrap_err();
        assert!(err.to_string().contains("384"));
    }

    #[test]
    fn test_point_is_keyed_by_row_id() {
        let point = to_point_struct(sample_point(4), 4).unwrap();
        assert_eq!(
            point.id,
            Some(PointId::from("00000000-0000-0000-0000-000000000000".to_string()))
        );
        assert_eq!(point.payload.get("media_type"), Some(&Value::from("image")));
        assert_eq!(point.payload.get("description"), Some(&Value::from("d")));
        assert!(point.payload.contains_key("tags"));
    }

    #[test]
    fn test_point_with_wrong_dimension_is_rejected() {
        assert!(to_point_struct(sample_point(384), 768).is_err());
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        let mut point = sample_point(4);
        point.payload = serde_json::json!(["not", "an", "object"]);
        assert!(to_point_struct(point, 4).is_err());
    }
}
