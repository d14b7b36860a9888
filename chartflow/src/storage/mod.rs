//! Object storage access.
//!
//! [`ObjectStorage`] is the seam every stage and the extractor talk to.
//! [`ObjectStoreStorage`] implements it over `object_store`, backed by S3, a
//! local directory (`file://` buckets) or memory.

mod upload;

pub use upload::{upload_csv, upload_with_backoff, UploadReport, UploadTarget};

use crate::config::{AwsConfig, StorageConfig};
use crate::errors::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload, RetryConfig};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Put, head and get against one bucket.
#[async_trait]
pub trait ObjectStorage: Send + Sync + fmt::Debug {
    /// Bucket (or root) this storage writes to.
    fn bucket(&self) -> &str;

    /// Writes an object, replacing any existing one.
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError>;

    /// Returns true if the object exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Reads an object.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;
}

/// Builds the dated key `{prefix}/{date}/{file}`.
#[must_use]
pub fn dated_key(prefix: &str, date: NaiveDate, file: &str) -> String {
    format!(
        "{}/{}/{}",
        prefix.trim_end_matches('/'),
        date.format("%Y-%m-%d"),
        file
    )
}

/// [`ObjectStorage`] over an `object_store` backend.
#[derive(Clone)]
pub struct ObjectStoreStorage {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl fmt::Debug for ObjectStoreStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreStorage")
            .field("bucket", &self.bucket)
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl ObjectStoreStorage {
    /// Wraps an existing store.
    #[must_use]
    pub fn new(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
        }
    }

    /// An empty in-memory store.
    #[must_use]
    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::new(bucket, Arc::new(InMemory::new()))
    }

    /// Builds the backend the configuration names.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the backend cannot be built.
    pub async fn from_config(
        storage: &StorageConfig,
        aws: &AwsConfig,
    ) -> Result<Self, StorageError> {
        if let Some(root) = storage.local_root() {
            tokio::fs::create_dir_all(&root)
                .await
                .map_err(|e| StorageError::Config {
                    message: format!("cannot create {}: {e}", root.display()),
                })?;
            let store = LocalFileSystem::new_with_prefix(&root).map_err(|e| {
                StorageError::Config {
                    message: e.to_string(),
                }
            })?;
            return Ok(Self::new(storage.bucket.clone(), Arc::new(store)));
        }

        // Upload retries are ours; the client must surface the first failure.
        let retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&storage.bucket)
            .with_region(&aws.region)
            .with_retry(retry);

        if let Some(creds) = aws.credentials() {
            builder = builder
                .with_access_key_id(creds.access_key_id)
                .with_secret_access_key(creds.secret_access_key.expose());
            if let Some(token) = creds.session_token {
                builder = builder.with_token(token.expose());
            }
        }

        if let Some(endpoint) = &storage.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(storage.allow_http);
        }

        let store = builder.build().map_err(|e| StorageError::Config {
            message: e.to_string(),
        })?;

        Ok(Self::new(storage.bucket.clone(), Arc::new(store)))
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        debug!(bucket = %self.bucket, key, bytes = body.len(), "Putting object");
        self.store
            .put(&Path::from(key), PutPayload::from(body))
            .await
            .map(|_| ())
            .map_err(|e| classify(&self.bucket, key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(classify(&self.bucket, key, e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .map_err(|e| classify(&self.bucket, key, e))?;
        result
            .bytes()
            .await
            .map_err(|e| classify(&self.bucket, key, e))
    }
}

/// Maps an `object_store` error onto the retryable/fatal split.
fn classify(bucket: &str, key: &str, err: object_store::Error) -> StorageError {
    if matches!(err, object_store::Error::NotFound { .. }) {
        return StorageError::NotFound {
            key: key.to_string(),
        };
    }

    let message = error_chain(&err);
    if message.contains("NoSuchBucket") {
        StorageError::NoSuchBucket {
            bucket: bucket.to_string(),
        }
    } else if message.contains("ServiceUnavailable")
        || message.contains("SlowDown")
        || message.contains("503")
    {
        StorageError::ServiceUnavailable { message }
    } else if message.contains("error sending request")
        || message.contains("connect")
        || message.contains("dns error")
        || message.contains("timed out")
    {
        StorageError::Endpoint { message }
    } else {
        StorageError::Other { message }
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dated_key() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            dated_key("raw/chart_songs/", date, "songs.csv"),
            "raw/chart_songs/2024-03-09/songs.csv"
        );
    }

    #[tokio::test]
    async fn test_in_memory_put_exists_get() {
        let storage = ObjectStoreStorage::in_memory("spotify-project1");
        let key = "raw/chart_songs/2024-01-01/songs.csv";

        assert!(!storage.exists(key).await.unwrap());
        storage.put(key, Bytes::from_static(b"a,b\n")).await.unwrap();
        assert!(storage.exists(key).await.unwrap());
        assert_eq!(storage.get(key).await.unwrap(), Bytes::from_static(b"a,b\n"));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let storage = ObjectStoreStorage::in_memory("b");
        let err = storage.get("nope.csv").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_local_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            bucket: format!("file://{}", dir.path().join("bucket").display()),
            ..StorageConfig::default()
        };

        let storage = ObjectStoreStorage::from_config(&config, &AwsConfig::default())
            .await
            .unwrap();
        storage
            .put("raw/x/2024-01-01/f.csv", Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert!(dir.path().join("bucket/raw/x/2024-01-01/f.csv").exists());
    }

    #[test]
    fn test_classify_generic_errors() {
        let generic = |msg: &str| object_store::Error::Generic {
            store: "S3",
            source: msg.to_string().into(),
        };

        assert!(matches!(
            classify("b", "k", generic("<Code>NoSuchBucket</Code>")),
            StorageError::NoSuchBucket { .. }
        ));
        assert!(classify("b", "k", generic("503 Service Unavailable")).is_retryable());
        assert!(classify("b", "k", generic("error sending request for url")).is_retryable());
        assert!(!classify("b", "k", generic("AccessDenied")).is_retryable());
    }
}
