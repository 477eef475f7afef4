//! Scripted command runner for testing

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::command::{CommandOutput, CommandRunner};

/// ffprobe JSON for a single video stream with optional rotation and an audio stream.
pub fn probe_json(duration_secs: f64, rotation: Option<i32>, has_audio: bool) -> Vec<u8> {
    let mut video = serde_json::json!({
        "codec_type": "video",
        "codec_name": "h264",
        "width": 1920,
        "height": 1080,
    });
    if let Some(rotation) = rotation {
        video["tags"] = serde_json::json!({ "rotate": rotation.to_string() });
    }
    let mut streams = vec![video];
    if has_audio {
        streams.push(serde_json::json!({ "codec_type": "audio", "codec_name": "aac" }));
    }
    serde_json::to_vec(&serde_json::json!({
        "streams": streams,
        "format": { "duration": format!("{:.6}", duration_secs) },
    }))
    .unwrap()
}

/// Answers ffprobe with a canned probe and every other program with success, recording
/// each invocation.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    probe: Vec<u8>,
    ffmpeg_error: Option<String>,
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
}

impl ScriptedRunner {
    pub fn with_probe(probe: Vec<u8>) -> Self {
        Self {
            probe,
            ..Default::default()
        }
    }

    /// Make every non-ffprobe invocation fail with `message`.
    pub fn failing_ffmpeg(mut self, message: &str) -> Self {
        self.ffmpeg_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));

        if program.ends_with("ffprobe") {
            return Ok(CommandOutput {
                stdout: self.probe.clone(),
            });
        }
        match &self.ffmpeg_error {
            Some(message) => Err(anyhow!("{} exited with 1: {}", program, message)),
            None => Ok(CommandOutput::default()),
        }
    }
}
