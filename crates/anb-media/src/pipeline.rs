//! The three-stage transformation pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use anb_models::encoding::{MAX_CLIP_SECONDS, TARGET_HEIGHT, TARGET_WIDTH};

use crate::bumpers::{concat_command, write_concat_list, BumperAssets, BumperCache};
use crate::command::CommandRunner;
use crate::error::MediaResult;
use crate::letterbox::letterbox_command;
use crate::stage::Stage;
use crate::trim::trim_command;

/// Tunables for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on output clip length (before bumpers)
    pub max_clip_secs: u32,
    /// Letterbox frame width
    pub width: u32,
    /// Letterbox frame height
    pub height: u32,
    /// Directory holding cached bumper clips
    pub assets_dir: PathBuf,
}

impl PipelineConfig {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_clip_secs: MAX_CLIP_SECONDS,
            width: TARGET_WIDTH,
            height: TARGET_HEIGHT,
            assets_dir: assets_dir.into(),
        }
    }
}

/// Runs the trim, letterbox and bumper stages through a `CommandRunner`.
pub struct Pipeline {
    runner: Arc<dyn CommandRunner>,
    config: PipelineConfig,
    bumpers: BumperCache,
}

impl Pipeline {
    pub fn new(runner: Arc<dyn CommandRunner>, config: PipelineConfig) -> Self {
        let bumpers = BumperCache::new(config.assets_dir.clone(), config.width, config.height);
        Self {
            runner,
            config,
            bumpers,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Cut `input` to at most `max_clip_secs`.
    pub async fn trim(&self, input: &Path, output: &Path) -> MediaResult<()> {
        let cmd = trim_command(input, output, self.config.max_clip_secs);
        self.runner.run(Stage::Trim, &cmd).await
    }

    /// Fit `input` into the target frame with black bars.
    pub async fn letterbox(&self, input: &Path, output: &Path) -> MediaResult<()> {
        let cmd = letterbox_command(input, output, self.config.width, self.config.height);
        self.runner.run(Stage::Letterbox, &cmd).await
    }

    /// Produce `intro + input + outro` in `output`.
    ///
    /// `list_file` is scratch space for the concat list; the caller owns
    /// its cleanup along with the rest of the working directory.
    pub async fn add_bumpers(&self, input: &Path, output: &Path, list_file: &Path) -> MediaResult<()> {
        let BumperAssets { intro, outro } = self.ensure_bumpers().await?;

        write_concat_list(list_file, &[&intro, input, &outro]).await?;
        let cmd = concat_command(list_file, output);
        self.runner.run(Stage::Bumpers, &cmd).await
    }

    /// Synthesize the bumper clips if they are not cached yet.
    pub async fn ensure_bumpers(&self) -> MediaResult<BumperAssets> {
        let assets = self.bumpers.ensure(self.runner.as_ref()).await?;
        info!(dir = %self.bumpers.assets_dir().display(), "Bumper assets ready");
        Ok(assets)
    }
}
