//! FFmpeg command builder and runner.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::stage::Stage;

/// Maximum number of stderr bytes kept on a failed invocation.
const STDERR_TAIL_BYTES: usize = 4096;

/// One `-i` input together with the demuxer options that precede it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Inputs in order of appearance
    inputs: Vec<FfmpegInput>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after all inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command reading a single file.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self::to_output(output).input(input)
    }

    /// Create a command with no inputs yet.
    pub fn to_output(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Append a file input.
    pub fn input(mut self, source: impl AsRef<Path>) -> Self {
        self.inputs.push(FfmpegInput {
            args: Vec::new(),
            source: source.as_ref().to_string_lossy().to_string(),
        });
        self
    }

    /// Append a libavfilter virtual input (`-f lavfi -i <graph>`).
    pub fn lavfi_input(mut self, graph: impl Into<String>) -> Self {
        self.inputs.push(FfmpegInput {
            args: vec!["-f".to_string(), "lavfi".to_string()],
            source: graph.into(),
        });
        self
    }

    /// Append a concat demuxer input reading a list file.
    ///
    /// `-safe 0` allows absolute paths in the list.
    pub fn concat_input(mut self, list_file: impl AsRef<Path>) -> Self {
        self.inputs.push(FfmpegInput {
            args: vec![
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                "0".to_string(),
            ],
            source: list_file.as_ref().to_string_lossy().to_string(),
        });
        self
    }

    /// Add an argument that precedes the most recently added input.
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        if let Some(last) = self.inputs.last_mut() {
            last.args.push(arg.into());
        }
        self
    }

    /// Add output arguments (after all inputs).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Limit output duration.
    pub fn duration(self, seconds: u32) -> Self {
        self.output_arg("-t").output_arg(seconds.to_string())
    }

    /// Copy every stream without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Output file this command writes.
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Number of `-i` inputs.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Executes FFmpeg invocations on behalf of a pipeline stage.
///
/// Success is judged only by exit status; output files are not inspected.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, stage: Stage, cmd: &FfmpegCommand) -> MediaResult<()>;
}

/// Runs FFmpeg as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// Program name or path of the ffmpeg binary
    program: PathBuf,
    /// Per-invocation timeout
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a runner that looks up `ffmpeg` on PATH.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            timeout: None,
        }
    }

    /// Use a specific ffmpeg binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve the configured binary.
    pub fn resolve(&self) -> MediaResult<PathBuf> {
        which::which(&self.program)
            .map_err(|_| MediaError::FfmpegNotFound(self.program.display().to_string()))
    }
}

#[async_trait]
impl CommandRunner for FfmpegRunner {
    async fn run(&self, stage: Stage, cmd: &FfmpegCommand) -> MediaResult<()> {
        let program = self.resolve()?;

        let args = cmd.build_args();
        debug!(stage = %stage, "Running FFmpeg: {} {}", program.display(), args.join(" "));

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let start = Instant::now();
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    // Dropping the future drops the child, which kills it.
                    warn!(stage = %stage, "FFmpeg timed out after {} seconds", limit.as_secs());
                    return Err(MediaError::Timeout {
                        stage,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait_with_output().await?,
        };

        metrics::histogram!("ffmpeg_command_seconds", "stage" => stage.as_str())
            .record(start.elapsed().as_secs_f64());

        if output.status.success() {
            return Ok(());
        }

        let stderr = stderr_tail(&output.stderr);
        Err(MediaError::ffmpeg_failed(
            stage,
            last_line(&stderr).unwrap_or("FFmpeg exited with non-zero status"),
            Some(stderr.clone()).filter(|s| !s.is_empty()),
            output.status.code(),
        ))
    }
}

/// Keep the trailing part of a diagnostic stream, where ffmpeg puts the cause.
fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mp4")
            .duration(30)
            .stream_copy();

        let args = cmd.build_args();
        assert_eq!(
            args,
            vec!["-y", "-v", "error", "-i", "input.mp4", "-t", "30", "-c", "copy", "output.mp4"]
        );
        assert_eq!(cmd.output(), Path::new("output.mp4"));
    }

    #[test]
    fn test_input_args_attach_to_their_input() {
        let cmd = FfmpegCommand::to_output("out.mp4")
            .lavfi_input("color=c=blue")
            .lavfi_input("anullsrc")
            .input_arg("-re");

        let args = cmd.build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-f lavfi -i color=c=blue -f lavfi -re -i anullsrc"));
        assert_eq!(cmd.input_count(), 2);
    }

    #[test]
    fn test_concat_input() {
        let args = FfmpegCommand::to_output("out.mp4")
            .concat_input("/tmp/list.txt")
            .stream_copy()
            .build_args();
        assert!(args
            .join(" ")
            .contains("-f concat -safe 0 -i /tmp/list.txt -c copy out.mp4"));
    }

    #[test]
    fn test_stderr_tail_truncates_from_the_front() {
        let mut raw = vec![b'a'; STDERR_TAIL_BYTES * 2];
        raw.extend_from_slice(b"\nMoov atom not found\n");
        let tail = stderr_tail(&raw);
        assert!(tail.len() <= STDERR_TAIL_BYTES);
        assert_eq!(last_line(&tail), Some("Moov atom not found"));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_not_found() {
        let runner = FfmpegRunner::new().with_program("definitely-not-ffmpeg-binary");
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");
        let err = runner.run(Stage::Trim, &cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }
}
