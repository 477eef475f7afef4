//! ffprobe invocation and output parsing.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Facts about a source video needed to transcode it.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProbe {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub codec: String,
    /// Rotation metadata in degrees, normalised to `0..360`.
    pub rotation: Option<u32>,
    pub has_audio: bool,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    tags: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    side_data_list: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_format".to_string(),
        "-show_streams".to_string(),
        input.to_string_lossy().to_string(),
    ]
}

/// Rotation of a video stream: the `rotate` tag when present, otherwise the absolute
/// value of the display-matrix rotation in `side_data_list`.
fn stream_rotation(stream: &ProbeStream) -> Option<u32> {
    let tagged = stream.tags.get("rotate").and_then(|v| match v {
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        serde_json::Value::Number(n) => n.as_i64(),
        _ => None,
    });

    let degrees = tagged.or_else(|| {
        stream
            .side_data_list
            .iter()
            .find_map(|sd| sd.get("rotation").and_then(|r| r.as_f64()))
            .map(|r| r.abs().round() as i64)
    })?;

    Some(degrees.rem_euclid(360) as u32)
}

pub fn parse_probe(stdout: &[u8]) -> Result<VideoProbe> {
    let output: ProbeOutput =
        serde_json::from_slice(stdout).context("Failed to parse ffprobe output")?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!("No video stream found"))?;

    let duration_secs = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| anyhow!("Could not parse duration"))?;

    let width = video.width.ok_or_else(|| anyhow!("Could not parse width"))?;
    let height = video.height.ok_or_else(|| anyhow!("Could not parse height"))?;

    Ok(VideoProbe {
        duration_secs,
        width,
        height,
        codec: video
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        rotation: stream_rotation(video),
        has_audio: output
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rotate_tag() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
                 "tags": {"rotate": "90"}},
                {"codec_type": "audio", "codec_name": "aac"}
            ],
            "format": {"duration": "30.000000"}
        }"#;

        let probe = parse_probe(json).unwrap();
        assert_eq!(probe.rotation, Some(90));
        assert_eq!(probe.duration_secs, 30.0);
        assert_eq!((probe.width, probe.height), (1920, 1080));
        assert_eq!(probe.codec, "h264");
        assert!(probe.has_audio);
    }

    #[test]
    fn test_parse_display_matrix_rotation() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "codec_name": "hevc", "width": 1280, "height": 720,
                 "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]}
            ],
            "format": {"duration": "12.5"}
        }"#;

        let probe = parse_probe(json).unwrap();
        assert_eq!(probe.rotation, Some(90));
        assert!(!probe.has_audio);
    }

    #[test]
    fn test_rotate_tag_wins_over_side_data() {
        let json = br#"{
            "streams": [
                {"codec_type": "video", "width": 10, "height": 10,
                 "tags": {"rotate": "270"},
                 "side_data_list": [{"rotation": 90}]}
            ],
            "format": {"duration": "1"}
        }"#;

        assert_eq!(parse_probe(json).unwrap().rotation, Some(270));
    }

    #[test]
    fn test_no_rotation_metadata() {
        let json = br#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 360}],
            "format": {"duration": "3.2"}
        }"#;

        assert_eq!(parse_probe(json).unwrap().rotation, None);
    }

    #[test]
    fn test_missing_video_stream_is_an_error() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3"}}"#;
        assert!(parse_probe(json).is_err());
    }

    #[test]
    fn test_missing_duration_is_an_error() {
        let json = br#"{"streams": [{"codec_type": "video", "width": 1, "height": 1}]}"#;
        assert!(parse_probe(json).is_err());
    }
}
