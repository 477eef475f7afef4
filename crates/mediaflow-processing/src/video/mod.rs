//! Video derivatives: probe, poster frame and multi-variant HLS bundle.

pub mod hls;
pub mod probe;

use anyhow::{anyhow, Context, Result};
use mediaflow_core::{Config, HlsRung};
use std::path::Path;
use std::sync::Arc;

use crate::command::CommandRunner;
pub use hls::{poster_timestamp, rotation_filter};
pub use probe::VideoProbe;

#[derive(Debug, Clone)]
pub struct VideoTranscoderOptions {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ladder: Vec<HlsRung>,
    pub segment_secs: u32,
    pub poster_width: u32,
}

impl VideoTranscoderOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            ladder: config.hls_ladder.clone(),
            segment_secs: config.hls_segment_secs,
            poster_width: config.poster_width,
        }
    }
}

impl Default for VideoTranscoderOptions {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            ladder: HlsRung::reference_ladder(),
            segment_secs: 6,
            poster_width: 400,
        }
    }
}

/// What a finished transcode produced.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRendition {
    pub probe: VideoProbe,
    pub rotation_filter: Option<&'static str>,
    pub poster_at_secs: f64,
    pub variant_count: usize,
}

#[derive(Clone)]
pub struct VideoTranscoder {
    runner: Arc<dyn CommandRunner>,
    options: VideoTranscoderOptions,
}

impl VideoTranscoder {
    pub fn new(runner: Arc<dyn CommandRunner>, options: VideoTranscoderOptions) -> Self {
        Self { runner, options }
    }

    #[tracing::instrument(skip(self), fields(ffmpeg.operation = "probe"))]
    pub async fn probe(&self, input: &Path) -> Result<VideoProbe> {
        let output = self
            .runner
            .run(&self.options.ffprobe_path, &probe::probe_args(input))
            .await
            .context("ffprobe failed")?;
        let probe = probe::parse_probe(&output.stdout)?;

        tracing::info!(
            duration_secs = probe.duration_secs,
            width = probe.width,
            height = probe.height,
            codec = %probe.codec,
            rotation = ?probe.rotation,
            "Video probe completed"
        );
        Ok(probe)
    }

    /// Probe `input`, write the poster frame to `poster_path`, then transcode the HLS
    /// bundle into `output_dir` (`master.m3u8` plus one `v{i}` directory per rung).
    #[tracing::instrument(skip(self, input, output_dir, poster_path), fields(ffmpeg.operation = "hls"))]
    pub async fn render(
        &self,
        input: &Path,
        output_dir: &Path,
        poster_path: &Path,
    ) -> Result<VideoRendition> {
        if self.options.ladder.is_empty() {
            return Err(anyhow!("HLS ladder is empty"));
        }

        let probe = self.probe(input).await?;
        let rotation = rotation_filter(probe.rotation);

        for i in 0..self.options.ladder.len() {
            tokio::fs::create_dir_all(output_dir.join(format!("v{}", i)))
                .await
                .context("Failed to create HLS variant directory")?;
        }

        let poster_at_secs = poster_timestamp(probe.duration_secs);
        self.runner
            .run(
                &self.options.ffmpeg_path,
                &hls::poster_args(input, poster_path, poster_at_secs, self.options.poster_width),
            )
            .await
            .context("Failed to extract poster frame")?;

        let args = hls::hls_args(&hls::HlsJob {
            input,
            output_dir,
            ladder: &self.options.ladder,
            segment_secs: self.options.segment_secs,
            rotation,
            has_audio: probe.has_audio,
        });
        self.runner
            .run(&self.options.ffmpeg_path, &args)
            .await
            .context("HLS transcode failed")?;

        tracing::info!(
            variants = self.options.ladder.len(),
            rotation_filter = ?rotation,
            "HLS bundle generated"
        );

        Ok(VideoRendition {
            probe,
            rotation_filter: rotation,
            poster_at_secs,
            variant_count: self.options.ladder.len(),
        })
    }
}
