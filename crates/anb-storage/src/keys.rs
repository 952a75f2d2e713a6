//! Object key conventions.

use std::path::Path;

use anb_models::VideoId;

/// Key of an uploaded original: `videos/{video_id}/{filename}`.
///
/// Only the final path component of `filename` is kept.
pub fn original_key(video_id: &VideoId, filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "original.mp4".to_string());
    format!("videos/{}/{}", video_id, name)
}

/// Key of the processed clip: `processed/{video_id}/processed_{video_id}.mp4`.
pub fn processed_key(video_id: &VideoId) -> String {
    format!("processed/{0}/processed_{0}.mp4", video_id)
}

/// Content type advertised for an object key.
pub fn content_type_for(key: &str) -> &'static str {
    match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = VideoId::from("abc");
        assert_eq!(original_key(&id, "match.mp4"), "videos/abc/match.mp4");
        assert_eq!(processed_key(&id), "processed/abc/processed_abc.mp4");
    }

    #[test]
    fn test_original_key_strips_directories() {
        let id = VideoId::from("abc");
        assert_eq!(original_key(&id, "../../etc/passwd"), "videos/abc/passwd");
        assert_eq!(original_key(&id, ""), "videos/abc/original.mp4");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("processed/a/processed_a.mp4"), "video/mp4");
        assert_eq!(content_type_for("videos/a/clip"), "application/octet-stream");
    }
}
