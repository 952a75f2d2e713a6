//! S3 object store backend.

use async_trait::async_trait;
use std::path::Path;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::operation::put_object::builders::PutObjectFluentBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::config::StorageKind;
use crate::error::{StorageError, StorageResult};
use crate::keys::content_type_for;
use crate::store::{BlobStore, Locator};

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack)
    pub endpoint_url: Option<String>,
    /// Static credentials; the default provider chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

/// S3 blob store.
///
/// Locators take the form `s3://{bucket}/{key}`.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
}

impl S3BlobStore {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::config_error("S3 bucket name is empty"));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            let credentials = Credentials::new(
                key_id,
                secret,
                config.session_token.clone(),
                None,
                "anb-static",
            );
            loader = loader.credentials_provider(credentials);
        }

        let sdk_config = loader.load().await;
        let mut builder = Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            region: config.region,
            endpoint_url: config.endpoint_url,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn locator_for(&self, key: &str) -> Locator {
        Locator::new(format!("s3://{}/{}", self.bucket, key))
    }

    /// Extract the object key from a locator.
    ///
    /// Accepts `s3://bucket/key`, virtual-hosted and path-style HTTPS URLs
    /// for this bucket, and bare keys.
    fn key_of(&self, locator: &Locator) -> StorageResult<String> {
        let raw = locator.as_str();
        let Ok(url) = Url::parse(raw) else {
            return Ok(raw.trim_start_matches('/').to_string());
        };

        let host = url.host_str().unwrap_or_default();
        let path = url.path().trim_start_matches('/');
        let key = match url.scheme() {
            "s3" if host == self.bucket => Some(path.to_string()),
            "http" | "https" if host.starts_with(&format!("{}.", self.bucket)) => {
                Some(path.to_string())
            }
            "http" | "https" => path
                .strip_prefix(&format!("{}/", self.bucket))
                .map(str::to_string),
            _ => None,
        };

        key.filter(|k| !k.is_empty())
            .ok_or_else(|| StorageError::ForeignLocator(raw.to_string()))
    }

    fn put_request(&self, key: &str) -> PutObjectFluentBuilder {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(key))
    }

    /// Send a single PutObject. S3 applies it atomically, so a failure
    /// leaves whatever was already stored under `key` untouched.
    async fn send_put(&self, request: PutObjectFluentBuilder, key: &str) -> StorageResult<Locator> {
        request
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        Ok(self.locator_for(key))
    }

    async fn put_body(&self, body: ByteStream, key: &str) -> StorageResult<Locator> {
        self.send_put(self.put_request(key).body(body), key).await
    }

    async fn head(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::AwsSdk(e.to_string())),
        }
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("S3 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    async fn put(&self, local_path: &Path, key: &str) -> StorageResult<Locator> {
        debug!("Uploading {} to {}", local_path.display(), key);

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        let locator = self.put_body(body, key).await?;

        info!("Uploaded {} to {}", local_path.display(), locator);
        Ok(locator)
    }

    async fn put_bytes(&self, data: Vec<u8>, key: &str) -> StorageResult<Locator> {
        debug!("Uploading {} bytes to {}", data.len(), key);
        self.put_body(ByteStream::from(data), key).await
    }

    async fn get(&self, locator: &Locator, local_path: &Path) -> StorageResult<()> {
        let key = self.key_of(locator)?;
        debug!("Downloading {} to {}", key, local_path.display());

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::not_found(locator.as_str())
                } else {
                    StorageError::download_failed(e.to_string())
                }
            })?;

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut body = response.body;
        let copied = async {
            let mut file = fs::File::create(local_path).await?;
            while let Some(chunk) = body.try_next().await.map_err(std::io::Error::other)? {
                file.write_all(&chunk).await?;
            }
            file.sync_all().await
        }
        .await;

        if let Err(e) = copied {
            let _ = fs::remove_file(local_path).await;
            return Err(StorageError::download_failed(format!(
                "Failed to write {}: {}",
                local_path.display(),
                e
            )));
        }

        info!("Downloaded {} to {}", key, local_path.display());
        Ok(())
    }

    async fn delete(&self, locator: &Locator) -> StorageResult<bool> {
        let key = self.key_of(locator)?;
        if !self.head(&key).await? {
            return Ok(false);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(true)
    }

    async fn exists(&self, locator: &Locator) -> StorageResult<bool> {
        let key = self.key_of(locator)?;
        self.head(&key).await
    }

    fn url_for(&self, key: &str) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(endpoint: Option<&str>) -> S3BlobStore {
        S3BlobStore::new(S3Config {
            bucket: "anb-videos".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: endpoint.map(str::to_string),
            access_key_id: Some("test".to_string()),
            secret_access_key: Some("test".to_string()),
            session_token: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_locator_key_extraction() {
        let store = store(None).await;
        let key = "processed/v1/processed_v1.mp4";

        assert_eq!(store.key_of(&store.locator_for(key)).unwrap(), key);
        assert_eq!(store.key_of(&Locator::new(store.url_for(key))).unwrap(), key);
        assert_eq!(store.key_of(&Locator::from(key)).unwrap(), key);
        assert!(matches!(
            store.key_of(&Locator::from("s3://other-bucket/a.mp4")),
            Err(StorageError::ForeignLocator(_))
        ));
    }

    #[tokio::test]
    async fn test_url_for_custom_endpoint_is_path_style() {
        let store = store(Some("http://localhost:9000/")).await;
        assert_eq!(
            store.url_for("videos/v1/a.mp4"),
            "http://localhost:9000/anb-videos/videos/v1/a.mp4"
        );
        let key = store
            .key_of(&Locator::new(store.url_for("videos/v1/a.mp4")))
            .unwrap();
        assert_eq!(key, "videos/v1/a.mp4");
    }

    #[tokio::test]
    async fn test_url_for_aws_is_virtual_hosted() {
        let store = store(None).await;
        assert_eq!(
            store.url_for("videos/v1/a.mp4"),
            "https://anb-videos.s3.us-east-1.amazonaws.com/videos/v1/a.mp4"
        );
    }

    #[tokio::test]
    #[ignore = "requires an S3-compatible endpoint at S3_ENDPOINT_URL"]
    async fn test_round_trip_against_endpoint() {
        let endpoint = std::env::var("S3_ENDPOINT_URL").unwrap();
        let store = store(Some(&endpoint)).await;
        let locator = store
            .put_bytes(b"payload".to_vec(), "tests/round_trip.mp4")
            .await
            .unwrap();
        assert!(store.exists(&locator).await.unwrap());

        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        store.get(&locator, &out).await.unwrap();
        assert_eq!(fs::read(&out).await.unwrap(), b"payload");
        assert!(store.delete(&locator).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires an S3-compatible endpoint at S3_ENDPOINT_URL"]
    async fn test_rejected_put_keeps_published_object() {
        let endpoint = std::env::var("S3_ENDPOINT_URL").unwrap();
        let store = store(Some(&endpoint)).await;
        let key = "tests/published.mp4";
        let locator = store.put_bytes(b"first".to_vec(), key).await.unwrap();

        // Conditional write on an existing key: the PutObject itself fails
        let rejected = store
            .put_request(key)
            .body(ByteStream::from(b"second".to_vec()))
            .if_none_match("*");
        let err = store.send_put(rejected, key).await.unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(_)));

        let out = tempfile::TempDir::new().unwrap();
        let path = out.path().join("published.mp4");
        store.get(&locator, &path).await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"first");
        store.delete(&locator).await.unwrap();
    }
}
