//! ffmpeg argument builders for the HLS bundle and the poster frame.

use mediaflow_core::HlsRung;
use std::path::Path;

/// Filter that turns a stream with the given rotation metadata upright.
pub fn rotation_filter(rotation: Option<u32>) -> Option<&'static str> {
    match rotation? {
        90 => Some("transpose=1"),
        180 => Some("hflip,vflip"),
        270 => Some("transpose=2"),
        _ => None,
    }
}

fn scale_filter(rotation: Option<&str>, rung: &HlsRung) -> String {
    let scale = format!("scale={}:{}", rung.width, rung.height);
    match rotation {
        Some(rotate) => format!("{},{}", rotate, scale),
        None => scale,
    }
}

/// Poster frames are taken at 5% of the duration.
pub fn poster_timestamp(duration_secs: f64) -> f64 {
    duration_secs * 0.05
}

/// Inputs of one multi-variant HLS transcode.
#[derive(Debug, Clone, Copy)]
pub struct HlsJob<'a> {
    pub input: &'a Path,
    pub output_dir: &'a Path,
    pub ladder: &'a [HlsRung],
    pub segment_secs: u32,
    pub rotation: Option<&'static str>,
    pub has_audio: bool,
}

/// Arguments for a single ffmpeg run that writes every variant as `v{i}/stream.m3u8`
/// with `v{i}/seg{n}.ts` segments, plus `master.m3u8` in `output_dir`.
///
/// Autorotation is disabled whenever an explicit rotation filter is applied so the
/// correction happens exactly once.
pub fn hls_args(job: &HlsJob<'_>) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];
    if job.rotation.is_some() {
        args.push("-noautorotate".into());
    }
    args.extend(["-i".into(), job.input.to_string_lossy().to_string()]);

    let filter_complex = job
        .ladder
        .iter()
        .enumerate()
        .map(|(i, rung)| format!("[0:v]{}[v{}]", scale_filter(job.rotation, rung), i))
        .collect::<Vec<_>>()
        .join(";");
    args.extend(["-filter_complex".into(), filter_complex]);

    for i in 0..job.ladder.len() {
        args.extend(["-map".into(), format!("[v{}]", i)]);
    }
    if job.has_audio {
        for _ in job.ladder {
            args.extend(["-map".to_string(), "0:a:0".to_string()]);
        }
    }

    for (i, rung) in job.ladder.iter().enumerate() {
        args.extend([
            format!("-c:v:{}", i),
            "libx264".into(),
            format!("-b:v:{}", i),
            format!("{}k", rung.video_bitrate_kbps),
        ]);
    }
    if job.has_audio {
        for (i, rung) in job.ladder.iter().enumerate() {
            args.extend([
                format!("-c:a:{}", i),
                "aac".into(),
                format!("-b:a:{}", i),
                format!("{}k", rung.audio_bitrate_kbps),
            ]);
        }
    }

    let var_stream_map = (0..job.ladder.len())
        .map(|i| {
            if job.has_audio {
                format!("v:{},a:{}", i, i)
            } else {
                format!("v:{}", i)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        job.segment_secs.to_string(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_flags".into(),
        "independent_segments".into(),
        "-master_pl_name".into(),
        "master.m3u8".into(),
        "-hls_segment_filename".into(),
        job.output_dir
            .join("v%v")
            .join("seg%d.ts")
            .to_string_lossy()
            .to_string(),
        "-var_stream_map".into(),
        var_stream_map,
        job.output_dir
            .join("v%v")
            .join("stream.m3u8")
            .to_string_lossy()
            .to_string(),
    ]);

    args
}

/// Arguments to grab a single JPEG frame `at_secs` into the video, `width` pixels wide.
pub fn poster_args(input: &Path, output: &Path, at_secs: f64, width: u32) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-ss".into(),
        format!("{:.3}", at_secs),
        "-i".into(),
        input.to_string_lossy().to_string(),
        "-frames:v".into(),
        "1".into(),
        "-vf".into(),
        format!("scale={}:-2", width),
        "-q:v".into(),
        "2".into(),
        output.to_string_lossy().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_rotation_filter_mapping() {
        assert_eq!(rotation_filter(Some(90)), Some("transpose=1"));
        assert_eq!(rotation_filter(Some(180)), Some("hflip,vflip"));
        assert_eq!(rotation_filter(Some(270)), Some("transpose=2"));
        assert_eq!(rotation_filter(Some(0)), None);
        assert_eq!(rotation_filter(Some(45)), None);
        assert_eq!(rotation_filter(None), None);
    }

    #[test]
    fn test_hls_args_with_rotation_and_audio() {
        let input = PathBuf::from("/data/videos/originals/a.mp4");
        let output = PathBuf::from("/data/videos/hls/a");
        let ladder = HlsRung::reference_ladder();
        let args = hls_args(&HlsJob {
            input: &input,
            output_dir: &output,
            ladder: &ladder,
            segment_secs: 6,
            rotation: rotation_filter(Some(90)),
            has_audio: true,
        });

        assert!(args.contains(&"-noautorotate".to_string()));
        assert_eq!(
            arg_after(&args, "-filter_complex"),
            Some(
                "[0:v]transpose=1,scale=640:360[v0];\
                 [0:v]transpose=1,scale=1280:720[v1];\
                 [0:v]transpose=1,scale=1920:1080[v2]"
            )
        );
        assert_eq!(arg_after(&args, "-b:v:0"), Some("800k"));
        assert_eq!(arg_after(&args, "-b:v:1"), Some("2800k"));
        assert_eq!(arg_after(&args, "-b:v:2"), Some("5000k"));
        assert_eq!(arg_after(&args, "-b:a:0"), Some("96k"));
        assert_eq!(arg_after(&args, "-b:a:2"), Some("192k"));
        assert_eq!(arg_after(&args, "-hls_time"), Some("6"));
        assert_eq!(arg_after(&args, "-hls_playlist_type"), Some("vod"));
        assert_eq!(arg_after(&args, "-hls_flags"), Some("independent_segments"));
        assert_eq!(arg_after(&args, "-master_pl_name"), Some("master.m3u8"));
        assert_eq!(
            arg_after(&args, "-var_stream_map"),
            Some("v:0,a:0 v:1,a:1 v:2,a:2")
        );
        assert_eq!(
            arg_after(&args, "-hls_segment_filename"),
            Some("/data/videos/hls/a/v%v/seg%d.ts")
        );
        assert_eq!(
            args.last().map(String::as_str),
            Some("/data/videos/hls/a/v%v/stream.m3u8")
        );
    }

    #[test]
    fn test_hls_args_without_audio_or_rotation() {
        let input = PathBuf::from("in.mp4");
        let output = PathBuf::from("out");
        let ladder = HlsRung::reference_ladder();
        let args = hls_args(&HlsJob {
            input: &input,
            output_dir: &output,
            ladder: &ladder,
            segment_secs: 6,
            rotation: None,
            has_audio: false,
        });

        assert!(!args.contains(&"-noautorotate".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("-c:a")));
        assert!(!args.contains(&"0:a:0".to_string()));
        assert_eq!(arg_after(&args, "-var_stream_map"), Some("v:0 v:1 v:2"));
        assert_eq!(
            arg_after(&args, "-filter_complex"),
            Some("[0:v]scale=640:360[v0];[0:v]scale=1280:720[v1];[0:v]scale=1920:1080[v2]")
        );
    }

    #[test]
    fn test_poster_at_five_percent() {
        assert!((poster_timestamp(30.0) - 1.5).abs() < 1e-9);
        let args = poster_args(Path::new("in.mp4"), Path::new("thumb.jpg"), 1.5, 400);
        assert_eq!(arg_after(&args, "-ss"), Some("1.500"));
        assert_eq!(arg_after(&args, "-vf"), Some("scale=400:-2"));
        assert_eq!(args.last().map(String::as_str), Some("thumb.jpg"));
    }
}
