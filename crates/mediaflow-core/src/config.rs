//! Configuration module
//!
//! Every recognised option is read from the environment (a `.env` file is loaded
//! first when present). Unset or unparsable values fall back to the defaults below;
//! [`Config::validate`] rejects combinations the pipeline cannot run with.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

const DB_MAX_CONNECTIONS: u32 = 10;
const DB_TIMEOUT_SECS: u64 = 30;
const STORAGE_ROOT: &str = "./storage";
const OLLAMA_URL: &str = "http://127.0.0.1:11434";
const VISION_MODEL: &str = "qwen3-vl:2b";
const EMBEDDING_MODEL: &str = "nomic-embed-text";
const EMBEDDING_DIM: usize = 768;
const QDRANT_URL: &str = "http://127.0.0.1:6334";
const QDRANT_COLLECTION: &str = "media_embeddings";
const QUEUE_ATTEMPTS: u32 = 3;
const QUEUE_BACKOFF_MS: u64 = 3000;
const IMAGE_WORKER_CONCURRENCY: usize = 5;
const VIDEO_WORKER_CONCURRENCY: usize = 2;
const QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const IMAGE_JOB_TIMEOUT_SECS: u64 = 300;
const VIDEO_JOB_TIMEOUT_SECS: u64 = 3600;
const STALE_JOB_REAP_INTERVAL_SECS: u64 = 60;
const STALE_JOB_GRACE_SECS: i64 = 300;
const CRON_INTERVAL_SECS: u64 = 120;
const EMBEDDING_STAGGER_SECS: u64 = 30;
const CRON_BATCH_SIZE: i64 = 10;
const MAX_AI_ATTEMPTS: i32 = 3;
const MAX_EMBEDDING_ATTEMPTS: i32 = 3;
const STALE_CLAIM_SECS: i64 = 900;
const MODEL_TIMEOUT_SECS: u64 = 120;
const HLS_LADDER: &str = "640x360@800/96,1280x720@2800/128,1920x1080@5000/192";
const HLS_SEGMENT_SECS: u32 = 6;
const THUMBNAIL_WIDTH: u32 = 800;
const THUMBNAIL_QUALITY: f32 = 80.0;
const PLACEHOLDER_WIDTH: u32 = 20;
const PLACEHOLDER_QUALITY: f32 = 20.0;
const POSTER_WIDTH: u32 = 400;
const MAX_VIDEO_DURATION_SECS: f64 = 600.0;

/// Number of variants every HLS bundle carries.
pub const HLS_VARIANT_COUNT: usize = 3;

/// One rung of the adaptive-bitrate ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HlsRung {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl HlsRung {
    pub const fn new(width: u32, height: u32, video_bitrate_kbps: u32, audio_bitrate_kbps: u32) -> Self {
        Self {
            width,
            height,
            video_bitrate_kbps,
            audio_bitrate_kbps,
        }
    }

    /// Reference ladder: 360p, 720p and 1080p.
    pub fn reference_ladder() -> Vec<HlsRung> {
        vec![
            HlsRung::new(640, 360, 800, 96),
            HlsRung::new(1280, 720, 2800, 128),
            HlsRung::new(1920, 1080, 5000, 192),
        ]
    }
}

impl FromStr for HlsRung {
    type Err = anyhow::Error;

    /// Parses `WIDTHxHEIGHT@VIDEO_KBPS/AUDIO_KBPS`, e.g. `1280x720@2800/128`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (size, rates) = s
            .split_once('@')
            .with_context(|| format!("HLS rung '{}' is missing '@'", s))?;
        let (width, height) = size
            .split_once('x')
            .with_context(|| format!("HLS rung '{}' has no WIDTHxHEIGHT", s))?;
        let (video, audio) = rates
            .split_once('/')
            .with_context(|| format!("HLS rung '{}' has no VIDEO/AUDIO bitrates", s))?;
        Ok(HlsRung {
            width: width.trim().parse().context("invalid HLS width")?,
            height: height.trim().parse().context("invalid HLS height")?,
            video_bitrate_kbps: video.trim().parse().context("invalid HLS video bitrate")?,
            audio_bitrate_kbps: audio.trim().parse().context("invalid HLS audio bitrate")?,
        })
    }
}

pub fn parse_hls_ladder(s: &str) -> Result<Vec<HlsRung>, anyhow::Error> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(HlsRung::from_str)
        .collect()
}

#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub storage_root: String,
    // Model endpoints
    pub ollama_url: String,
    pub vision_model: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub model_timeout_secs: u64,
    // Vector index
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub qdrant_api_key: Option<String>,
    // Queue and worker pools
    pub queue_attempts: u32,
    pub queue_backoff_ms: u64,
    pub image_worker_concurrency: usize,
    pub video_worker_concurrency: usize,
    pub queue_poll_interval_ms: u64,
    pub image_job_timeout_secs: u64,
    pub video_job_timeout_secs: u64,
    /// Interval between stale job reaper runs. 0 disables the reaper.
    pub stale_job_reap_interval_secs: u64,
    pub stale_job_grace_secs: i64,
    // Cron stages
    pub cron_interval_secs: u64,
    pub embedding_stagger_secs: u64,
    pub cron_batch_size: i64,
    pub max_ai_attempts: i32,
    pub max_embedding_attempts: i32,
    pub stale_claim_secs: i64,
    // Derivatives
    pub hls_ladder: Vec<HlsRung>,
    pub hls_segment_secs: u32,
    pub thumbnail_width: u32,
    pub thumbnail_quality: f32,
    pub placeholder_width: u32,
    pub placeholder_quality: f32,
    pub poster_width: u32,
    pub max_video_duration_secs: f64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        fn parsed<T: FromStr>(raw: Option<String>, default: T) -> T {
            raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        }

        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .context("DATABASE_URL must be set")?;

        let storage_root = lookup("STORAGE_ROOT")
            .or_else(|| lookup("STORAGE_DIRECTORY"))
            .unwrap_or_else(|| STORAGE_ROOT.to_string());

        let hls_ladder = parse_hls_ladder(&get("HLS_LADDER", HLS_LADDER))?;

        Ok(Config {
            environment: lookup("ENVIRONMENT")
                .or_else(|| lookup("APP_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            database_url,
            db_max_connections: parsed(lookup("DB_MAX_CONNECTIONS"), DB_MAX_CONNECTIONS),
            db_timeout_seconds: parsed(lookup("DB_TIMEOUT_SECONDS"), DB_TIMEOUT_SECS),
            storage_root,
            ollama_url: get("OLLAMA_URL", OLLAMA_URL),
            vision_model: get("VISION_MODEL", VISION_MODEL),
            embedding_model: get("EMBEDDING_MODEL", EMBEDDING_MODEL),
            embedding_dim: parsed(lookup("EMBEDDING_DIM"), EMBEDDING_DIM),
            model_timeout_secs: parsed(lookup("MODEL_TIMEOUT_SECS"), MODEL_TIMEOUT_SECS),
            qdrant_url: get("QDRANT_URL", QDRANT_URL),
            qdrant_collection: get("QDRANT_COLLECTION", QDRANT_COLLECTION),
            qdrant_api_key: lookup("QDRANT_API_KEY").filter(|v| !v.is_empty()),
            queue_attempts: parsed(lookup("QUEUE_ATTEMPTS"), QUEUE_ATTEMPTS),
            queue_backoff_ms: parsed(lookup("QUEUE_BACKOFF_MS"), QUEUE_BACKOFF_MS),
            image_worker_concurrency: parsed(
                lookup("IMAGE_WORKER_CONCURRENCY"),
                IMAGE_WORKER_CONCURRENCY,
            ),
            video_worker_concurrency: parsed(
                lookup("VIDEO_WORKER_CONCURRENCY"),
                VIDEO_WORKER_CONCURRENCY,
            ),
            queue_poll_interval_ms: parsed(lookup("QUEUE_POLL_INTERVAL_MS"), QUEUE_POLL_INTERVAL_MS),
            image_job_timeout_secs: parsed(lookup("IMAGE_JOB_TIMEOUT_SECS"), IMAGE_JOB_TIMEOUT_SECS),
            video_job_timeout_secs: parsed(lookup("VIDEO_JOB_TIMEOUT_SECS"), VIDEO_JOB_TIMEOUT_SECS),
            stale_job_reap_interval_secs: parsed(
                lookup("STALE_JOB_REAP_INTERVAL_SECS"),
                STALE_JOB_REAP_INTERVAL_SECS,
            ),
            stale_job_grace_secs: parsed(lookup("STALE_JOB_GRACE_SECS"), STALE_JOB_GRACE_SECS),
            cron_interval_secs: parsed(lookup("CRON_INTERVAL_SECS"), CRON_INTERVAL_SECS),
            embedding_stagger_secs: parsed(lookup("EMBEDDING_STAGGER_SECS"), EMBEDDING_STAGGER_SECS),
            cron_batch_size: parsed(lookup("CRON_BATCH_SIZE"), CRON_BATCH_SIZE),
            max_ai_attempts: parsed(lookup("MAX_AI_ATTEMPTS"), MAX_AI_ATTEMPTS),
            max_embedding_attempts: parsed(lookup("MAX_EMBEDDING_ATTEMPTS"), MAX_EMBEDDING_ATTEMPTS),
            stale_claim_secs: parsed(lookup("STALE_CLAIM_SECS"), STALE_CLAIM_SECS),
            hls_ladder,
            hls_segment_secs: parsed(lookup("HLS_SEGMENT_SECS"), HLS_SEGMENT_SECS),
            thumbnail_width: parsed(lookup("THUMBNAIL_WIDTH"), THUMBNAIL_WIDTH),
            thumbnail_quality: parsed(lookup("THUMBNAIL_QUALITY"), THUMBNAIL_QUALITY),
            placeholder_width: parsed(lookup("PLACEHOLDER_WIDTH"), PLACEHOLDER_WIDTH),
            placeholder_quality: parsed(lookup("PLACEHOLDER_QUALITY"), PLACEHOLDER_QUALITY),
            poster_width: parsed(lookup("POSTER_WIDTH"), POSTER_WIDTH),
            max_video_duration_secs: parsed(
                lookup("MAX_VIDEO_DURATION_SECS"),
                MAX_VIDEO_DURATION_SECS,
            ),
            ffmpeg_path: get("FFMPEG_PATH", "ffmpeg"),
            ffprobe_path: get("FFPROBE_PATH", "ffprobe"),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://"))
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.image_worker_concurrency == 0 || self.video_worker_concurrency == 0 {
            return Err(anyhow::anyhow!("Worker concurrency must be at least 1"));
        }

        if self.queue_attempts == 0 {
            return Err(anyhow::anyhow!("QUEUE_ATTEMPTS must be at least 1"));
        }

        if self.cron_batch_size <= 0 {
            return Err(anyhow::anyhow!("CRON_BATCH_SIZE must be at least 1"));
        }

        if self.max_ai_attempts <= 0 || self.max_embedding_attempts <= 0 {
            return Err(anyhow::anyhow!(
                "MAX_AI_ATTEMPTS and MAX_EMBEDDING_ATTEMPTS must be at least 1"
            ));
        }

        if self.cron_interval_secs == 0 {
            return Err(anyhow::anyhow!("CRON_INTERVAL_SECS must be at least 1"));
        }

        for (name, value) in [
            ("QUEUE_POLL_INTERVAL_MS", self.queue_poll_interval_ms),
            ("IMAGE_JOB_TIMEOUT_SECS", self.image_job_timeout_secs),
            ("VIDEO_JOB_TIMEOUT_SECS", self.video_job_timeout_secs),
            ("MODEL_TIMEOUT_SECS", self.model_timeout_secs),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("{} must be at least 1", name));
            }
        }

        if self.hls_ladder.len() != HLS_VARIANT_COUNT {
            return Err(anyhow::anyhow!(
                "HLS_LADDER must define exactly {} variants, got {}",
                HLS_VARIANT_COUNT,
                self.hls_ladder.len()
            ));
        }

        for quality in [self.thumbnail_quality, self.placeholder_quality] {
            if !(0.0..=100.0).contains(&quality) {
                return Err(anyhow::anyhow!(
                    "Thumbnail and placeholder quality must be between 0 and 100"
                ));
            }
        }

        if self.embedding_dim == 0 {
            return Err(anyhow::anyhow!("EMBEDDING_DIM must be at least 1"));
        }

        Ok(())
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn cron_interval(&self) -> Duration {
        Duration::from_secs(self.cron_interval_secs)
    }

    pub fn embedding_stagger(&self) -> Duration {
        Duration::from_secs(self.embedding_stagger_secs)
    }

    pub fn queue_backoff(&self) -> Duration {
        Duration::from_millis(self.queue_backoff_ms)
    }
}
