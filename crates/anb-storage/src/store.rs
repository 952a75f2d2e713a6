//! The blob store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::config::StorageKind;
use crate::error::StorageResult;

/// Opaque reference to a stored blob, as returned by `put`.
///
/// Persisted verbatim in the video record and handed back to the same store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Locator {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Locator {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Uniform put/get/delete of binary video blobs.
///
/// Every call is a complete transfer. A failed `put` leaves no partial
/// object behind, and `get` on a locator that does not resolve fails with
/// `StorageError::NotFound`.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend identifier.
    fn kind(&self) -> StorageKind;

    /// Store the file at `local_path` under `key`.
    async fn put(&self, local_path: &Path, key: &str) -> StorageResult<Locator>;

    /// Store an in-memory payload under `key`.
    async fn put_bytes(&self, data: Vec<u8>, key: &str) -> StorageResult<Locator>;

    /// Copy the blob at `locator` to `local_path`, creating parent directories.
    async fn get(&self, locator: &Locator, local_path: &Path) -> StorageResult<()>;

    /// Remove the blob. Returns false when nothing was stored there.
    async fn delete(&self, locator: &Locator) -> StorageResult<bool>;

    async fn exists(&self, locator: &Locator) -> StorageResult<bool>;

    /// Externally visible location of `key`.
    fn url_for(&self, key: &str) -> String;
}
