//! Mediaflow Services Library
//!
//! Clients for the external systems the enrichment stages call: the Ollama vision
//! and embedding models and the Qdrant vector index. Each sits behind a trait so
//! the stages can run against scripted fakes.

pub mod description;
pub mod ollama;
pub mod traits;
pub mod vector;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use description::{DescriptionError, StructuredDescription, IMAGE_EXTRACT_PROMPT};
pub use ollama::OllamaClient;
pub use traits::{with_timeout, EmbeddingModel, VectorIndex, VectorPoint, VisionModel};
pub use vector::{ensure_dimension, QdrantIndex};
