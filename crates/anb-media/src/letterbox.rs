//! Letterbox stage: fit the clip into a fixed frame without distortion.

use std::path::Path;

use crate::command::FfmpegCommand;

/// Scale down to fit `width`x`height` preserving aspect ratio, then pad
/// with centered black bars.
pub fn letterbox_filter(width: u32, height: u32) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black",
        w = width,
        h = height
    )
}

/// Build the letterbox command. Audio is copied untouched.
pub fn letterbox_command(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    width: u32,
    height: u32,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_filter(letterbox_filter(width, height))
        .audio_codec("copy")
}
