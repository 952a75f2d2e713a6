//! Blob storage for the highlights pipeline.
//!
//! This crate provides:
//! - The `BlobStore` contract (put/get/delete/exists over opaque locators)
//! - A filesystem backend rooted at the uploads directory
//! - An S3 backend (AWS or any S3-compatible endpoint)
//! - Key conventions for original and processed videos
//! - Explicit backend selection from configuration

pub mod config;
pub mod error;
pub mod keys;
pub mod local;
pub mod s3;
pub mod store;

pub use config::{connect, StorageConfig, StorageKind};
pub use error::{StorageError, StorageResult};
pub use keys::{original_key, processed_key};
pub use local::LocalBlobStore;
pub use s3::{S3BlobStore, S3Config};
pub use store::{BlobStore, Locator};
