//! Fixed processing constants.

/// Maximum duration kept from an uploaded clip, in seconds.
pub const MAX_CLIP_SECONDS: u32 = 30;

/// Output frame width after letterboxing.
pub const TARGET_WIDTH: u32 = 1280;
/// Output frame height after letterboxing.
pub const TARGET_HEIGHT: u32 = 720;

/// Duration of each branded intro/outro bumper, in seconds.
pub const BUMPER_SECONDS: u32 = 5;
/// Frame rate of the synthesized bumpers.
pub const BUMPER_FPS: u32 = 30;
/// Sample rate of the silent bumper audio track.
pub const BUMPER_SAMPLE_RATE: u32 = 48_000;
/// Intro bumper colour.
pub const INTRO_COLOR: &str = "blue";
/// Outro bumper colour.
pub const OUTRO_COLOR: &str = "red";

/// Codec used when synthesizing bumpers (they have no source stream to copy).
pub const BUMPER_VIDEO_CODEC: &str = "libx264";
/// Audio codec used when synthesizing bumpers.
pub const BUMPER_AUDIO_CODEC: &str = "aac";

/// Total attempts allowed per job before a failure is terminal.
pub const MAX_ATTEMPTS: u32 = 5;
/// Fixed delay between attempts, in seconds.
pub const RETRY_DELAY_SECS: u64 = 60;

/// Frame size as an ffmpeg `WxH` string.
pub fn target_size() -> String {
    format!("{}x{}", TARGET_WIDTH, TARGET_HEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_size_is_720p() {
        assert_eq!(target_size(), "1280x720");
        assert_eq!(TARGET_WIDTH * 9, TARGET_HEIGHT * 16);
    }
}
