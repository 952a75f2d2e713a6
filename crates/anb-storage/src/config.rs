//! Storage backend selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::local::LocalBlobStore;
use crate::s3::{S3BlobStore, S3Config};
use crate::store::BlobStore;

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    S3,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::S3 => "s3",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" | "filesystem" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::S3),
            other => Err(StorageError::config_error(format!(
                "Unknown STORAGE_BACKEND '{}': expected 'local' or 's3'",
                other
            ))),
        }
    }
}

/// Storage configuration.
///
/// The backend is always named explicitly; the presence of cloud
/// credentials never switches it.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// Root directory of the filesystem backend
    pub uploads_dir: PathBuf,
    pub s3: S3Config,
}

impl StorageConfig {
    /// Filesystem backend rooted at `uploads_dir`.
    pub fn local(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind: StorageKind::Local,
            uploads_dir: uploads_dir.into(),
            s3: S3Config {
                bucket: "anb-videos".to_string(),
                region: "us-east-1".to_string(),
                endpoint_url: None,
                access_key_id: None,
                secret_access_key: None,
                session_token: None,
            },
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let kind = match std::env::var("STORAGE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => StorageKind::Local,
        };

        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Ok(Self {
            kind,
            uploads_dir: std::env::var("UPLOADS_DIR")
                .unwrap_or_else(|_| "uploads".to_string())
                .into(),
            s3: S3Config {
                bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "anb-videos".to_string()),
                region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                endpoint_url: non_empty("S3_ENDPOINT_URL"),
                access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
                secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
                session_token: non_empty("AWS_SESSION_TOKEN"),
            },
        })
    }
}

/// Construct the configured backend.
pub async fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.kind {
        StorageKind::Local => Arc::new(LocalBlobStore::new(&config.uploads_dir).await?),
        StorageKind::S3 => Arc::new(S3BlobStore::new(config.s3.clone()).await?),
    };
    info!(backend = %config.kind, "Storage backend ready");
    Ok(store)
}
