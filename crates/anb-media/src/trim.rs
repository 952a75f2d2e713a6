//! Trim stage: cut the clip to the maximum highlight length.

use std::path::Path;

use crate::command::FfmpegCommand;

/// Build the trim command.
///
/// Streams are copied, so the cut lands on the nearest keyframe and the
/// result may run slightly past `max_secs`. Clips shorter than the limit
/// pass through whole.
pub fn trim_command(input: impl AsRef<Path>, output: impl AsRef<Path>, max_secs: u32) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .duration(max_secs)
        .stream_copy()
}
