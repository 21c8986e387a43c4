//! Transcoder argument construction.
//!
//! Values resolve in order: explicit [`TranscodeOptions`], then the named
//! [`QualityProfile`](crate::quality::QualityProfile), then the defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::quality::{self, Resolution};

pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 128;
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_PLAYLIST_SIZE: u32 = 6;
pub const DEFAULT_RTSP_TRANSPORT: &str = "tcp";
pub const VIDEO_CODEC: &str = "libx264";
pub const AUDIO_CODEC: &str = "aac";

/// Per-stream overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscodeOptions {
    /// Drop the audio track entirely
    pub no_audio: bool,
    /// Minimise input buffering at the cost of robustness
    pub low_latency: bool,
    /// Video filter scale expression, e.g. `1280:-2`
    pub scale: Option<String>,
    pub video_bitrate_kbps: Option<u32>,
    pub max_bitrate_kbps: Option<u32>,
    pub resolution: Option<Resolution>,
    pub segment_secs: Option<u32>,
    pub preset: Option<String>,
    pub audio_bitrate_kbps: Option<u32>,
    pub playlist_size: Option<u32>,
    pub rtsp_transport: Option<String>,
}

impl TranscodeOptions {
    pub fn no_audio(mut self) -> Self {
        self.no_audio = true;
        self
    }

    pub fn low_latency(mut self) -> Self {
        self.low_latency = true;
        self
    }

    pub fn with_scale(mut self, scale: impl Into<String>) -> Self {
        self.scale = Some(scale.into());
        self
    }

    /// Reject overrides that cannot be passed to the transcoder as given.
    pub fn validate(&self) -> Result<(), StreamError> {
        if let Some(scale) = &self.scale {
            validate_scale(scale)?;
        }
        Ok(())
    }
}

/// `W:H` where each side is an integer, `-1`/`-2` keeping the aspect ratio
fn validate_scale(scale: &str) -> Result<(), StreamError> {
    let valid_side = |side: &str| {
        let digits = side.strip_prefix('-').unwrap_or(side);
        !digits.is_empty() && digits.len() <= 5 && digits.bytes().all(|b| b.is_ascii_digit())
    };
    match scale.split_once(':') {
        Some((width, height)) if valid_side(width) && valid_side(height) => Ok(()),
        _ => Err(StreamError::ConfigurationInvalid(format!(
            "scale must look like 1280:-2, got '{}'",
            scale
        ))),
    }
}

/// Build the transcoder argument vector. Pure and deterministic.
///
/// Segments are written next to the playlist as `<playlist stem>_%03d.ts`.
pub fn build_args(
    source_uri: &str,
    output_path: &Path,
    quality_name: &str,
    options: &TranscodeOptions,
) -> Vec<String> {
    let profile = quality::resolve(quality_name);

    let video_bitrate = options.video_bitrate_kbps.unwrap_or(profile.video_bitrate_kbps);
    let max_bitrate = options
        .max_bitrate_kbps
        .unwrap_or(profile.max_bitrate_kbps)
        .max(video_bitrate);
    let resolution = options.resolution.unwrap_or(profile.resolution);
    let segment_secs = options.segment_secs.unwrap_or(profile.segment_secs).max(1);
    let preset = options.preset.as_deref().unwrap_or(profile.preset);
    let audio_bitrate = options.audio_bitrate_kbps.unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS);
    let playlist_size = options.playlist_size.unwrap_or(DEFAULT_PLAYLIST_SIZE);
    let transport = options
        .rtsp_transport
        .as_deref()
        .unwrap_or(DEFAULT_RTSP_TRANSPORT);

    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-rtsp_transport", transport]
        .iter()
        .map(|s| s.to_string())
        .collect();

    if options.low_latency {
        args.extend(
            ["-fflags", "nobuffer", "-flags", "low_delay", "-probesize", "32", "-analyzeduration", "0"]
                .iter()
                .map(|s| s.to_string()),
        );
    }

    args.extend([
        "-i".to_string(),
        source_uri.to_string(),
        "-c:v".to_string(),
        VIDEO_CODEC.to_string(),
        "-preset".to_string(),
        preset.to_string(),
    ]);

    if options.low_latency {
        args.extend(["-tune".to_string(), "zerolatency".to_string()]);
    }

    args.extend([
        "-b:v".to_string(),
        format!("{}k", video_bitrate),
        "-maxrate".to_string(),
        format!("{}k", max_bitrate),
        "-bufsize".to_string(),
        format!("{}k", max_bitrate.saturating_mul(2)),
    ]);

    // An explicit scale filter replaces the fixed output size
    if options.scale.is_none() {
        args.extend(["-s".to_string(), resolution.to_string()]);
    }

    if options.no_audio {
        args.push("-an".to_string());
    } else {
        args.extend([
            "-c:a".to_string(),
            AUDIO_CODEC.to_string(),
            "-b:a".to_string(),
            format!("{}k", audio_bitrate),
            "-ar".to_string(),
            DEFAULT_AUDIO_SAMPLE_RATE.to_string(),
        ]);
    }

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        segment_secs.to_string(),
        "-hls_list_size".to_string(),
        playlist_size.to_string(),
        "-hls_flags".to_string(),
        "delete_segments+independent_segments".to_string(),
        "-hls_segment_filename".to_string(),
        segment_pattern(output_path),
    ]);

    if let Some(scale) = &options.scale {
        args.extend(["-vf".to_string(), format!("scale={}", scale)]);
    }

    args.push(output_path.to_string_lossy().to_string());
    args
}

/// `<dir>/<stem>_%03d.ts` for a playlist at `<dir>/<stem>.m3u8`
pub fn segment_pattern(output_path: &Path) -> String {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    output_path
        .with_file_name(format!("{}_%03d.ts", stem))
        .to_string_lossy()
        .to_string()
}
