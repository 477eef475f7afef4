use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::media::MediaKind;

/// Status shared by the AI sub-machine and the embedding sub-machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "ai_status", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum AiStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiStatus::Pending => "pending",
            AiStatus::Processing => "processing",
            AiStatus::Completed => "completed",
            AiStatus::Failed => "failed",
        }
    }
}

impl Display for AiStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AiStatus::Pending),
            "processing" => Ok(AiStatus::Processing),
            "completed" => Ok(AiStatus::Completed),
            "failed" => Ok(AiStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid AI status: {}", s)),
        }
    }
}

/// One row of `media_ai_data`: the AI and embedding state of a single media item.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AiEnrichment {
    pub id: Uuid,
    pub media_id: Uuid,
    pub media_type: MediaKind,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: AiStatus,
    pub error: Option<String>,
    pub attempts: i32,
    pub completed_at: Option<DateTime<Utc>>,
    pub embedding_status: AiStatus,
    pub embedding_error: Option<String>,
    pub embedding_attempts: i32,
    pub embedding_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A media item claimed by the AI stage. The enrichment row is already `processing`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AiClaim {
    pub enrichment_id: Uuid,
    pub media_id: Uuid,
    pub file_path: String,
    pub media_type: MediaKind,
}

/// An enrichment row claimed by the embedding stage. `embedding_status` is already `processing`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EmbeddingClaim {
    pub enrichment_id: Uuid,
    pub media_id: Uuid,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub media_type: MediaKind,
}

/// Claim limits passed to the store by a cron stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimLimits {
    pub batch_size: i64,
    pub max_attempts: i32,
}
