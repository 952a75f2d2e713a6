//! Intro/outro bumpers: synthesis, caching and concatenation.
//!
//! Both bumpers are synthesized once per assets directory and reused by
//! every subsequent job. Each is a solid-color frame with a silent stereo
//! track, encoded with the same parameters so the concat demuxer can join
//! them to the letterboxed clip without re-encoding.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use anb_models::encoding::{
    BUMPER_AUDIO_CODEC, BUMPER_FPS, BUMPER_SAMPLE_RATE, BUMPER_SECONDS, BUMPER_VIDEO_CODEC,
    INTRO_COLOR, OUTRO_COLOR,
};

use crate::command::{CommandRunner, FfmpegCommand};
use crate::error::{MediaError, MediaResult};
use crate::stage::Stage;

pub const INTRO_FILE: &str = "intro.mp4";
pub const OUTRO_FILE: &str = "outro.mp4";

/// Paths of the cached bumper clips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BumperAssets {
    pub intro: PathBuf,
    pub outro: PathBuf,
}

/// Build the command that renders one bumper clip.
pub fn bumper_command(color: &str, width: u32, height: u32, output: impl AsRef<Path>) -> FfmpegCommand {
    FfmpegCommand::to_output(output)
        .lavfi_input(format!(
            "color=c={color}:size={width}x{height}:duration={BUMPER_SECONDS}:rate={BUMPER_FPS}"
        ))
        .lavfi_input(format!(
            "anullsrc=channel_layout=stereo:sample_rate={BUMPER_SAMPLE_RATE}:duration={BUMPER_SECONDS}"
        ))
        .video_codec(BUMPER_VIDEO_CODEC)
        .audio_codec(BUMPER_AUDIO_CODEC)
        .duration(BUMPER_SECONDS)
}

/// Build the command that joins the files named in a concat list.
pub fn concat_command(list_file: impl AsRef<Path>, output: impl AsRef<Path>) -> FfmpegCommand {
    FfmpegCommand::to_output(output)
        .concat_input(list_file)
        .stream_copy()
}

/// Render a concat demuxer list for `parts`, in order.
///
/// Paths are made absolute because the demuxer resolves relative entries
/// against the list file's directory.
pub fn concat_list(parts: &[&Path]) -> MediaResult<String> {
    let mut body = String::new();
    for part in parts {
        let absolute = std::path::absolute(part)?;
        let escaped = absolute.to_string_lossy().replace('\'', r"'\''");
        body.push_str(&format!("file '{escaped}'\n"));
    }
    Ok(body)
}

/// Write the concat list file for `parts`.
pub async fn write_concat_list(list_file: impl AsRef<Path>, parts: &[&Path]) -> MediaResult<()> {
    fs::write(list_file.as_ref(), concat_list(parts)?).await?;
    Ok(())
}

/// Lazily synthesized, shared bumper clips.
pub struct BumperCache {
    assets_dir: PathBuf,
    width: u32,
    height: u32,
    lock: Mutex<()>,
}

impl BumperCache {
    pub fn new(assets_dir: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            width,
            height,
            lock: Mutex::new(()),
        }
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    fn assets(&self) -> BumperAssets {
        BumperAssets {
            intro: self.assets_dir.join(INTRO_FILE),
            outro: self.assets_dir.join(OUTRO_FILE),
        }
    }

    /// Return the bumper paths, synthesizing any that are missing.
    ///
    /// Concurrent callers in this process serialize on the cache lock.
    /// Each bumper is rendered into a temporary sibling and renamed into
    /// place, so other processes sharing the directory never observe a
    /// partially written file.
    pub async fn ensure(&self, runner: &dyn CommandRunner) -> MediaResult<BumperAssets> {
        let assets = self.assets();
        if assets.intro.exists() && assets.outro.exists() {
            return Ok(assets);
        }

        let _guard = self.lock.lock().await;
        fs::create_dir_all(&self.assets_dir).await?;

        for (path, color) in [(&assets.intro, INTRO_COLOR), (&assets.outro, OUTRO_COLOR)] {
            if path.exists() {
                continue;
            }
            self.synthesize(runner, color, path).await?;
        }

        Ok(assets)
    }

    async fn synthesize(&self, runner: &dyn CommandRunner, color: &str, dest: &Path) -> MediaResult<()> {
        let tmp = self
            .assets_dir
            .join(format!(".{}-{}.mp4", color, uuid::Uuid::new_v4().simple()));

        info!(color, path = %dest.display(), "Synthesizing bumper clip");
        let cmd = bumper_command(color, self.width, self.height, &tmp);
        if let Err(e) = runner.run(Stage::Bumpers, &cmd).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        if !tmp.exists() {
            return Err(MediaError::FileNotFound(tmp));
        }

        fs::rename(&tmp, dest).await?;
        debug!(path = %dest.display(), "Bumper cached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes a placeholder to the command output and counts invocations.
    #[derive(Default)]
    struct TouchRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for TouchRunner {
        async fn run(&self, _stage: Stage, cmd: &FfmpegCommand) -> MediaResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::write(cmd.output(), b"bumper").await?;
            Ok(())
        }
    }

    #[test]
    fn test_bumper_command_parameters() {
        let args = bumper_command("blue", 1280, 720, "intro.mp4").build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-f lavfi -i color=c=blue:size=1280x720:duration=5:rate=30"));
        assert!(joined.contains(
            "-f lavfi -i anullsrc=channel_layout=stereo:sample_rate=48000:duration=5"
        ));
        assert!(joined.ends_with("-c:v libx264 -c:a aac -t 5 intro.mp4"));
    }

    #[test]
    fn test_concat_list_quotes_paths() {
        let list = concat_list(&[Path::new("/a/intro.mp4"), Path::new("/b/it's.mp4")]).unwrap();
        assert_eq!(list, "file '/a/intro.mp4'\nfile '/b/it'\\''s.mp4'\n");
    }

    #[tokio::test]
    async fn test_bumpers_synthesized_once() {
        let dir = TempDir::new().unwrap();
        let cache = BumperCache::new(dir.path().join("assets"), 1280, 720);
        let runner = TouchRunner::default();

        let first = cache.ensure(&runner).await.unwrap();
        assert!(first.intro.exists());
        assert!(first.outro.exists());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);

        let second = cache.ensure(&runner).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_only_missing_bumper_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let cache = BumperCache::new(dir.path(), 1280, 720);
        let runner = TouchRunner::default();

        let assets = cache.ensure(&runner).await.unwrap();
        fs::remove_file(&assets.outro).await.unwrap();

        cache.ensure(&runner).await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
        assert!(assets.outro.exists());
    }
}
