use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "media_type", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// Name of the durable queue that carries this kind's derivative jobs.
    pub fn queue_name(&self) -> &'static str {
        match self {
            MediaKind::Image => "image-processing",
            MediaKind::Video => "video-processing",
        }
    }

    pub fn job_name(&self) -> &'static str {
        match self {
            MediaKind::Image => "process-image",
            MediaKind::Video => "process-video",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => Err(anyhow::anyhow!("Invalid media kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "media_processing_status", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Unprocessed,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Unprocessed => "unprocessed",
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Whether a worker may move an item in this status to `processing`.
    /// `failed` re-enters on a queue retry; `completed` is final.
    pub fn can_start_processing(&self) -> bool {
        !matches!(self, ProcessingStatus::Completed)
    }
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unprocessed" => Ok(ProcessingStatus::Unprocessed),
            "queued" => Ok(ProcessingStatus::Queued),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid processing status: {}", s)),
        }
    }
}

/// Image MIME types accepted at intake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ImageMimeType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/webp")]
    Webp,
    #[serde(rename = "image/gif")]
    Gif,
}

impl ImageMimeType {
    pub const ALL: [ImageMimeType; 4] = [
        ImageMimeType::Jpeg,
        ImageMimeType::Png,
        ImageMimeType::Webp,
        ImageMimeType::Gif,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMimeType::Jpeg => "image/jpeg",
            ImageMimeType::Png => "image/png",
            ImageMimeType::Webp => "image/webp",
            ImageMimeType::Gif => "image/gif",
        }
    }
}

impl FromStr for ImageMimeType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Ok(ImageMimeType::Jpeg),
            "image/png" => Ok(ImageMimeType::Png),
            "image/webp" => Ok(ImageMimeType::Webp),
            "image/gif" => Ok(ImageMimeType::Gif),
            other => Err(AppError::UnsupportedMediaType(other.to_string())),
        }
    }
}

/// Video MIME types accepted at intake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VideoMimeType {
    #[serde(rename = "video/mp4")]
    Mp4,
    #[serde(rename = "video/quicktime")]
    QuickTime,
    #[serde(rename = "video/webm")]
    Webm,
    #[serde(rename = "video/x-matroska")]
    Matroska,
}

impl VideoMimeType {
    pub const ALL: [VideoMimeType; 4] = [
        VideoMimeType::Mp4,
        VideoMimeType::QuickTime,
        VideoMimeType::Webm,
        VideoMimeType::Matroska,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoMimeType::Mp4 => "video/mp4",
            VideoMimeType::QuickTime => "video/quicktime",
            VideoMimeType::Webm => "video/webm",
            VideoMimeType::Matroska => "video/x-matroska",
        }
    }
}

impl FromStr for VideoMimeType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video/mp4" => Ok(VideoMimeType::Mp4),
            "video/quicktime" => Ok(VideoMimeType::QuickTime),
            "video/webm" => Ok(VideoMimeType::Webm),
            "video/x-matroska" => Ok(VideoMimeType::Matroska),
            other => Err(AppError::UnsupportedMediaType(other.to_string())),
        }
    }
}

/// A declared MIME type resolved against the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredMime {
    Image(ImageMimeType),
    Video(VideoMimeType),
}

impl DeclaredMime {
    pub fn parse(mime: &str) -> Result<Self, AppError> {
        if let Ok(image) = mime.parse::<ImageMimeType>() {
            return Ok(DeclaredMime::Image(image));
        }
        mime.parse::<VideoMimeType>().map(DeclaredMime::Video)
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            DeclaredMime::Image(_) => MediaKind::Image,
            DeclaredMime::Video(_) => MediaKind::Video,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredMime::Image(m) => m.as_str(),
            DeclaredMime::Video(m) => m.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaItem {
    pub id: Uuid,
    pub owner_id: String,
    pub file_path: String,
    pub file_name: String,
    pub mime_type: String,
    pub media_type: MediaKind,
    pub file_size: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_secs: Option<f64>,
    pub rotation: Option<i32>,
    pub codec: Option<String>,
    pub processing_status: ProcessingStatus,
    pub thumbnail_path: Option<String>,
    pub placeholder_path: Option<String>,
    pub hls_dir: Option<String>,
    pub video_thumb_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values written by intake when a media item is first recorded.
#[derive(Debug, Clone)]
pub struct NewMediaItem {
    pub owner_id: String,
    pub file_path: String,
    pub file_name: String,
    pub mime: DeclaredMime,
    pub file_size: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration_secs: Option<f64>,
    pub rotation: Option<i32>,
    pub codec: Option<String>,
    pub processing_status: ProcessingStatus,
}

/// Storage keys of the derivatives produced by one worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativePaths {
    pub thumbnail_path: Option<String>,
    pub placeholder_path: Option<String>,
    pub hls_dir: Option<String>,
    pub video_thumb_path: Option<String>,
}

impl DerivativePaths {
    pub fn image(thumbnail_path: String, placeholder_path: String) -> Self {
        Self {
            thumbnail_path: Some(thumbnail_path),
            placeholder_path: Some(placeholder_path),
            ..Default::default()
        }
    }

    pub fn video(hls_dir: String, video_thumb_path: String) -> Self {
        Self {
            hls_dir: Some(hls_dir),
            video_thumb_path: Some(video_thumb_path),
            ..Default::default()
        }
    }
}
