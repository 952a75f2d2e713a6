//! Full pipeline against a real ffmpeg install.

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use anb_db::{Database, SqliteVideoRepository, VideoRepository};
use anb_media::{inspect_clip, CommandRunner, FfmpegCommand, FfmpegRunner, Pipeline, PipelineConfig, Stage};
use anb_models::{VideoId, VideoRecord, VideoStatus};
use anb_queue::ProcessVideoJob;
use anb_storage::{original_key, BlobStore, LocalBlobStore};
use anb_worker::{process_video, AttemptOutcome, ProcessingContext};

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe on PATH"]
async fn test_long_clip_is_trimmed_letterboxed_and_bumpered() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(FfmpegRunner::new());

    // 45s, 640x360, with audio
    let source = dir.path().join("source.mp4");
    let generate = FfmpegCommand::to_output(&source)
        .lavfi_input("testsrc=size=640x360:rate=30:duration=45")
        .lavfi_input("sine=frequency=440:sample_rate=48000:duration=45")
        .video_codec("libx264")
        .audio_codec("aac")
        .output_args(["-ac", "2"])
        .duration(45);
    runner.run(Stage::Trim, &generate).await.unwrap();

    let storage = Arc::new(LocalBlobStore::new(dir.path().join("uploads")).await.unwrap());
    let videos = Arc::new(SqliteVideoRepository::new(
        Database::open(&dir.path().join("anb.db")).unwrap(),
    ));
    let video_id = VideoId::from("e2e");
    let locator = storage
        .put(&source, &original_key(&video_id, "source.mp4"))
        .await
        .unwrap();
    videos
        .insert(&VideoRecord::uploaded(video_id.clone(), locator.into_string()))
        .await
        .unwrap();

    let ctx = ProcessingContext {
        storage: storage.clone(),
        videos: videos.clone(),
        pipeline: Arc::new(Pipeline::new(
            runner,
            PipelineConfig::new(dir.path().join("assets")),
        )),
        work_dir: dir.path().join("work"),
    };

    let outcome = process_video(&ctx, &ProcessVideoJob::new(video_id.clone()), "e2e-1")
        .await
        .unwrap();
    let AttemptOutcome::Processed { locator } = outcome else {
        panic!("expected the clip to be processed");
    };

    let record = videos.find(&video_id).await.unwrap().unwrap();
    assert_eq!(record.status, VideoStatus::Processed);

    let info = inspect_clip(Path::new(locator.as_str())).await.unwrap();
    assert_eq!((info.width, info.height), (1280, 720));
    assert!(info.has_audio);
    // 30s of content plus two 5s bumpers; stream copy trims on keyframes
    assert!(
        (info.duration - 40.0).abs() < 2.0,
        "unexpected duration {}",
        info.duration
    );
    assert!(!dir.path().join("work").join("e2e").exists());
}
