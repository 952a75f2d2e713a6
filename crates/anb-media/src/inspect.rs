//! Inspection of finished clips with ffprobe.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Dimensions, length and audio presence of a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    pub width: u32,
    pub height: u32,
    /// Seconds
    pub duration: f64,
    pub has_audio: bool,
}

#[derive(Deserialize)]
struct Report {
    #[serde(default)]
    streams: Vec<StreamEntry>,
    format: Option<FormatEntry>,
}

#[derive(Deserialize)]
struct StreamEntry {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize)]
struct FormatEntry {
    duration: Option<String>,
}

impl ClipInfo {
    fn from_report(raw: &[u8]) -> MediaResult<Self> {
        let report: Report = serde_json::from_slice(raw)?;
        let video = report
            .streams
            .iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| MediaError::InvalidVideo("no video stream".to_string()))?;
        let (width, height) = (video.width.unwrap_or(0), video.height.unwrap_or(0));
        let has_audio = report.streams.iter().any(|s| s.codec_type == "audio");

        let duration = report
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| MediaError::InvalidVideo("no container duration".to_string()))?;

        Ok(Self {
            width,
            height,
            duration,
            has_audio,
        })
    }
}

/// Read the first video stream's size, the container duration and whether
/// any audio stream exists.
pub async fn inspect_clip(path: &Path) -> MediaResult<ClipInfo> {
    if !fs::try_exists(path).await? {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let program = which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new(program)
        .args([
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type,width,height:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("ffprobe exited with {}", output.status),
            stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        });
    }
    ClipInfo::from_report(&output.stdout)
}
