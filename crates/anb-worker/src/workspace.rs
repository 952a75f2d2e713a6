//! Per-attempt scratch directories.

use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use anb_models::VideoId;

use crate::error::ProcessingError;

/// Scratch files for one processing attempt.
///
/// Lives at `{work_dir}/{video_id}/attempt-{n}-{token}/`. The random token
/// keeps a redelivered attempt from sharing files with a straggler still
/// running the same attempt number elsewhere.
#[derive(Debug)]
pub struct WorkingFiles {
    video_dir: PathBuf,
    dir: PathBuf,
    source: PathBuf,
}

impl WorkingFiles {
    /// Create a fresh directory for `attempt` of `video_id`.
    ///
    /// `source_name` picks the extension of the downloaded source.
    pub async fn create(
        work_dir: &Path,
        video_id: &VideoId,
        attempt: u32,
        source_name: &str,
    ) -> Result<Self, ProcessingError> {
        let video_dir = work_dir.join(dir_name(video_id)?);
        let token = uuid::Uuid::new_v4().simple().to_string();
        let dir = video_dir.join(format!("attempt-{}-{}", attempt, &token[..8]));

        fs::create_dir_all(&dir)
            .await
            .map_err(|source| ProcessingError::Workspace {
                path: dir.clone(),
                source,
            })?;

        let extension = Path::new(source_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or("mp4");
        let source = dir.join(format!("source.{}", extension));

        debug!(dir = %dir.display(), "Created working directory");
        Ok(Self {
            video_dir,
            dir,
            source,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn trimmed(&self) -> PathBuf {
        self.dir.join("trimmed.mp4")
    }

    pub fn letterboxed(&self) -> PathBuf {
        self.dir.join("letterboxed.mp4")
    }

    pub fn final_output(&self) -> PathBuf {
        self.dir.join("final.mp4")
    }

    pub fn concat_list(&self) -> PathBuf {
        self.dir.join("concat.txt")
    }

    /// Remove the attempt directory, and the video directory once empty.
    ///
    /// Failures are logged and swallowed; leftover scratch never changes
    /// the outcome of an attempt.
    pub async fn cleanup(self) {
        if let Err(e) = fs::remove_dir_all(&self.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), "Failed to remove working directory: {}", e);
            }
        }
        // Fails while sibling attempts still hold files
        if fs::remove_dir(&self.video_dir).await.is_ok() {
            debug!(dir = %self.video_dir.display(), "Removed empty video directory");
        }
    }
}

/// The id as one normal path component, never `.`, `..` or a nested path.
fn dir_name(video_id: &VideoId) -> Result<&str, ProcessingError> {
    let id = video_id.as_str();
    let mut components = Path::new(id).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || id.contains(['/', '\\']) {
        return Err(ProcessingError::UnsafeVideoId {
            video_id: video_id.clone(),
        });
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_attempt_directories_are_distinct() {
        let root = TempDir::new().unwrap();
        let id = VideoId::from("v1");

        let a = WorkingFiles::create(root.path(), &id, 1, "clip.mov").await.unwrap();
        let b = WorkingFiles::create(root.path(), &id, 1, "clip.mov").await.unwrap();

        assert_ne!(a.dir(), b.dir());
        assert!(a.dir().starts_with(root.path().join("v1")));
        assert!(a
            .dir()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("attempt-1-"));
        assert_eq!(a.source().extension().unwrap(), "mov");
    }

    #[tokio::test]
    async fn test_cleanup_removes_files_and_empty_parent() {
        let root = TempDir::new().unwrap();
        let id = VideoId::from("v1");
        let files = WorkingFiles::create(root.path(), &id, 2, "clip").await.unwrap();
        fs::write(files.trimmed(), b"x").await.unwrap();
        assert_eq!(files.source().extension().unwrap(), "mp4");

        files.cleanup().await;
        assert!(!root.path().join("v1").exists());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_parent_with_sibling_attempt() {
        let root = TempDir::new().unwrap();
        let id = VideoId::from("v1");
        let first = WorkingFiles::create(root.path(), &id, 1, "a.mp4").await.unwrap();
        let second = WorkingFiles::create(root.path(), &id, 2, "a.mp4").await.unwrap();
        let second_dir = second.dir().to_path_buf();

        first.cleanup().await;
        assert!(second_dir.is_dir());
        second.cleanup().await;
        assert!(!root.path().join("v1").exists());
    }

    #[tokio::test]
    async fn test_video_id_with_path_segments_is_rejected() {
        let root = TempDir::new().unwrap();
        let work_dir = root.path().join("work");

        for raw in ["", ".", "..", "../escape", "a/b", "v1/", "/etc", "a\\b"] {
            let err = WorkingFiles::create(&work_dir, &VideoId::from(raw), 1, "clip.mp4")
                .await
                .unwrap_err();
            assert!(
                matches!(err, ProcessingError::UnsafeVideoId { .. }),
                "accepted {raw:?}"
            );
            assert!(!err.is_retryable());
        }
        assert!(!work_dir.exists());
        assert!(!root.path().join("escape").exists());
    }
}
