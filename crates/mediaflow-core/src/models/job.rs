use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;
use uuid::Uuid;

use super::media::{ImageMimeType, MediaKind, VideoMimeType};

/// Upper bound on the delay between two attempts of the same job.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Retry policy attached to a job when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, the first run included.
    pub attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(3000),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts,
            initial_backoff,
        }
    }

    /// Delay before the next attempt once `attempts_made` attempts have failed,
    /// or `None` when the policy is exhausted.
    pub fn next_delay(&self, attempts_made: u32) -> Option<Duration> {
        if attempts_made >= self.attempts {
            return None;
        }
        Some(compute_backoff(self.initial_backoff, attempts_made))
    }
}

/// Exponential backoff: `initial × 2^(attempts_made - 1)`, capped at [`MAX_RETRY_BACKOFF`].
#[inline]
pub fn compute_backoff(initial: Duration, attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(31);
    initial
        .checked_mul(2_u32.pow(exponent))
        .unwrap_or(MAX_RETRY_BACKOFF)
        .min(MAX_RETRY_BACKOFF)
}

/// A durable queue record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaJob {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub backoff_delay_ms: i64,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MediaJob {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.max_attempts.max(0) as u32,
            Duration::from_millis(self.backoff_delay_ms.max(0) as u64),
        )
    }

    /// Delay before the next attempt, `None` once the job has used all its attempts.
    pub fn next_retry_delay(&self) -> Option<Duration> {
        self.retry_policy()
            .next_delay(self.attempts_made.max(0) as u32)
    }
}

/// Payload carried by a job on one media kind's queue.
///
/// Each implementor is bound to exactly one kind, so an image payload can never be
/// placed on the video queue.
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn kind() -> MediaKind;

    fn media_id(&self) -> Uuid;

    fn file_path(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageJobPayload {
    pub media_id: Uuid,
    pub file_path: String,
    pub mime_type: ImageMimeType,
}

impl JobPayload for ImageJobPayload {
    fn kind() -> MediaKind {
        MediaKind::Image
    }

    fn media_id(&self) -> Uuid {
        self.media_id
    }

    fn file_path(&self) -> &str {
        &self.file_path
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoJobPayload {
    pub media_id: Uuid,
    pub file_path: String,
    pub mime_type: VideoMimeType,
}

impl JobPayload for VideoJobPayload {
    fn kind() -> MediaKind {
        MediaKind::Video
    }

    fn media_id(&self) -> Uuid {
        self.media_id
    }

    fn file_path(&self) -> &str {
        &self.file_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_policy_is_three_attempts_from_three_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(3000)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(6000)));
        assert_eq!(policy.next_delay(3), None);
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn test_backoff_is_capped() {
        let initial = Duration::from_millis(3000);
        assert_eq!(compute_backoff(initial, 7), Duration::from_millis(192_000));
        assert_eq!(compute_backoff(initial, 8), MAX_RETRY_BACKOFF);
        assert_eq!(compute_backoff(initial, 40), MAX_RETRY_BACKOFF);
    }

    #[test]
    fn test_image_payload_wire_shape() {
        let media_id = Uuid::new_v4();
        let payload = ImageJobPayload {
            media_id,
            file_path: "images/originals/a.png".to_string(),
            mime_type: ImageMimeType::Png,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "media_id": media_id,
                "file_path": "images/originals/a.png",
                "mime_type": "image/png",
            })
        );
    }

    #[test]
    fn test_video_payload_rejects_image_mime() {
        let value = json!({
            "media_id": Uuid::new_v4(),
            "file_path": "videos/originals/a.mp4",
            "mime_type": "image/png",
        });
        assert!(serde_json::from_value::<VideoJobPayload>(value).is_err());
    }
}
