//! Fixtures shared by the worker's unit tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

use anb_db::{Database, DbError, DbResult, SqliteVideoRepository, VideoRepository};
use anb_media::{CommandRunner, FfmpegCommand, MediaError, MediaResult, Pipeline, PipelineConfig, Stage};
use anb_models::{VideoId, VideoRecord, VideoStatus};
use anb_storage::{
    original_key, BlobStore, LocalBlobStore, Locator, StorageError, StorageKind, StorageResult,
};

use crate::processor::ProcessingContext;

fn stage_failure(stage: Stage) -> MediaError {
    MediaError::ffmpeg_failed(
        stage,
        "ffmpeg exited with status 1",
        Some("Invalid data found when processing input".to_string()),
        Some(1),
    )
}

/// Records stages and writes a placeholder output instead of running ffmpeg.
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<(Stage, usize)>>,
    fail_at: Mutex<Option<Stage>>,
    stalled_trim: Mutex<Option<Arc<Notify>>>,
    delay: Option<Duration>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(stage: Stage) -> Self {
        let runner = Self::default();
        *runner.fail_at.lock().unwrap() = Some(stage);
        runner
    }

    /// Sleep before every command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The next trim blocks until `release` is notified, then fails.
    pub fn stall_next_trim(&self, release: Arc<Notify>) {
        *self.stalled_trim.lock().unwrap() = Some(release);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        *self.fail_at.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    pub fn count(&self, stage: Stage) -> usize {
        self.calls().into_iter().filter(|s| *s == stage).count()
    }

    /// Stages in order, leaving out bumper synthesis (the lavfi commands
    /// with two generated inputs).
    pub fn stages_excluding_synthesis(&self) -> Vec<Stage> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(stage, inputs)| !(*stage == Stage::Bumpers && *inputs == 2))
            .map(|(s, _)| *s)
            .collect()
    }

    fn take_stall(&self, stage: Stage) -> Option<Arc<Notify>> {
        if stage != Stage::Trim {
            return None;
        }
        self.stalled_trim.lock().unwrap().take()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, stage: Stage, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.calls.lock().unwrap().push((stage, cmd.input_count()));
        if let Some(release) = self.take_stall(stage) {
            release.notified().await;
            return Err(stage_failure(stage));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_at.lock().unwrap() == Some(stage) {
            return Err(stage_failure(stage));
        }
        tokio::fs::write(cmd.output(), b"media").await?;
        Ok(())
    }
}

/// Failures injected around the real storage and repository.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    /// Every `put` fails.
    pub reject_uploads: bool,
    /// `get` reports success without writing the destination file.
    pub hollow_downloads: bool,
    /// `save` fails for FAILED records.
    pub reject_failed_saves: bool,
}

/// Local storage with optional injected failures.
pub struct FaultyStore {
    inner: Arc<LocalBlobStore>,
    faults: Faults,
}

#[async_trait]
impl BlobStore for FaultyStore {
    fn kind(&self) -> StorageKind {
        self.inner.kind()
    }

    async fn put(&self, local_path: &Path, key: &str) -> StorageResult<Locator> {
        if self.faults.reject_uploads {
            return Err(StorageError::upload_failed("connection reset by peer"));
        }
        self.inner.put(local_path, key).await
    }

    async fn put_bytes(&self, data: Vec<u8>, key: &str) -> StorageResult<Locator> {
        self.inner.put_bytes(data, key).await
    }

    async fn get(&self, locator: &Locator, local_path: &Path) -> StorageResult<()> {
        if self.faults.hollow_downloads {
            return Ok(());
        }
        self.inner.get(locator, local_path).await
    }

    async fn delete(&self, locator: &Locator) -> StorageResult<bool> {
        self.inner.delete(locator).await
    }

    async fn exists(&self, locator: &Locator) -> StorageResult<bool> {
        self.inner.exists(locator).await
    }

    fn url_for(&self, key: &str) -> String {
        self.inner.url_for(key)
    }
}

/// SQLite repository with optional injected failures.
pub struct FaultyRepo {
    inner: Arc<SqliteVideoRepository>,
    faults: Faults,
    rejected_saves: AtomicUsize,
}

impl FaultyRepo {
    pub fn rejected_saves(&self) -> usize {
        self.rejected_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoRepository for FaultyRepo {
    async fn insert(&self, record: &VideoRecord) -> DbResult<()> {
        self.inner.insert(record).await
    }

    async fn find(&self, video_id: &VideoId) -> DbResult<Option<VideoRecord>> {
        self.inner.find(video_id).await
    }

    async fn save(&self, record: &VideoRecord) -> DbResult<()> {
        if self.faults.reject_failed_saves && record.status == VideoStatus::Failed {
            self.rejected_saves.fetch_add(1, Ordering::SeqCst);
            return Err(DbError::LockPoisoned);
        }
        self.inner.save(record).await
    }
}

/// Local storage, in-memory SQLite and a fake runner under one temp dir.
pub struct Fixture {
    dir: TempDir,
    pub storage: Arc<LocalBlobStore>,
    pub videos: Arc<SqliteVideoRepository>,
    pub repo: Arc<FaultyRepo>,
    pub runner: Arc<FakeRunner>,
    pub ctx: Arc<ProcessingContext>,
}

impl Fixture {
    pub async fn new(runner: FakeRunner) -> Self {
        Self::with_faults(runner, Faults::default()).await
    }

    pub async fn with_faults(runner: FakeRunner, faults: Faults) -> Self {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(LocalBlobStore::new(dir.path().join("uploads")).await.unwrap());
        let videos = Arc::new(SqliteVideoRepository::new(Database::open_in_memory().unwrap()));
        let repo = Arc::new(FaultyRepo {
            inner: videos.clone(),
            faults,
            rejected_saves: AtomicUsize::new(0),
        });
        let runner = Arc::new(runner);
        let pipeline = Pipeline::new(runner.clone(), PipelineConfig::new(dir.path().join("assets")));

        let ctx = Arc::new(ProcessingContext {
            storage: Arc::new(FaultyStore {
                inner: storage.clone(),
                faults,
            }),
            videos: repo.clone(),
            pipeline: Arc::new(pipeline),
            work_dir: dir.path().join("work"),
        });

        Self {
            dir,
            storage,
            videos,
            repo,
            runner,
            ctx,
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    pub fn work_dir(&self) -> &Path {
        &self.ctx.work_dir
    }

    /// Store an original and insert its UPLOADED record.
    pub async fn upload(&self, id: &str) -> VideoRecord {
        let video_id = VideoId::from(id);
        let locator = self
            .storage
            .put_bytes(b"source".to_vec(), &original_key(&video_id, "clip.mp4"))
            .await
            .unwrap();
        let record = VideoRecord::uploaded(video_id, locator.into_string());
        self.videos.insert(&record).await.unwrap();
        record
    }

    pub async fn record(&self, id: &str) -> VideoRecord {
        self.videos.find(&VideoId::from(id)).await.unwrap().unwrap()
    }
}
