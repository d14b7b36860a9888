//! CSV upload with doubling backoff.

use super::ObjectStorage;
use crate::errors::{StorageError, UploadError};
use crate::pipeline::{should_retry, RetryConfig, RetryDecision, RetryState};
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

/// Where an upload goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Object key.
    pub key: String,
    /// Attempts, including the first.
    pub attempts: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
}

impl UploadTarget {
    /// Creates a target.
    #[must_use]
    pub fn new(key: impl Into<String>, attempts: usize, initial_delay: Duration) -> Self {
        Self {
            key: key.into(),
            attempts,
            initial_delay,
        }
    }
}

/// What a successful upload took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    /// Bucket written to.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Body size.
    pub bytes: usize,
    /// Attempts made, including the successful one.
    pub attempts: usize,
    /// Delays waited between attempts.
    #[serde(skip)]
    pub delays: Vec<Duration>,
}

/// Puts `body` at the target key, retrying retryable errors.
///
/// The delay starts at `initial_delay` and doubles after every retry. A
/// missing bucket is logged and returned as [`UploadError::BucketNotFound`].
///
/// # Errors
///
/// Returns [`UploadError::RetriesExhausted`] with the last error once every
/// attempt failed, or the first non-retryable error.
pub async fn upload_with_backoff(
    storage: &dyn ObjectStorage,
    target: &UploadTarget,
    body: Bytes,
) -> Result<UploadReport, UploadError> {
    let policy = RetryConfig::doubling(target.attempts.max(1), target.initial_delay);
    let mut state = RetryState::new();
    let key = target.key.as_str();

    loop {
        match storage.put(key, body.clone()).await {
            Ok(()) => {
                info!(
                    bucket = storage.bucket(),
                    key,
                    attempts = state.attempts(),
                    "Upload complete"
                );
                return Ok(UploadReport {
                    bucket: storage.bucket().to_string(),
                    key: key.to_string(),
                    bytes: body.len(),
                    attempts: state.attempts(),
                    delays: state.delays,
                });
            }
            Err(StorageError::NoSuchBucket { bucket }) => {
                error!(bucket = %bucket, key, "Bucket does not exist, please check the storage configuration");
                return Err(UploadError::BucketNotFound {
                    bucket,
                    key: key.to_string(),
                });
            }
            Err(e) if e.is_retryable() => match should_retry(&mut state, &policy) {
                RetryDecision::Retry(delay) => {
                    warn!(key, error = %e, delay_secs = delay.as_secs_f64(), "Upload failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(UploadError::RetriesExhausted {
                        key: key.to_string(),
                        attempts: state.attempts(),
                        source: e,
                    });
                }
            },
            Err(e) => {
                return Err(UploadError::Failed {
                    key: key.to_string(),
                    source: e,
                });
            }
        }
    }
}

/// Serializes records as CSV and uploads them.
///
/// # Errors
///
/// Returns CSV errors and any [`upload_with_backoff`] error.
pub async fn upload_csv<T: crate::extract::CsvRecord>(
    storage: &dyn ObjectStorage,
    target: &UploadTarget,
    records: &[T],
) -> Result<UploadReport, crate::errors::ExtractError> {
    let body = crate::extract::to_csv(records)?;
    Ok(upload_with_backoff(storage, target, Bytes::from(body)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyStorage;
    use pretty_assertions::assert_eq;

    fn target() -> UploadTarget {
        UploadTarget::new("raw/chart_songs/2024-01-01/songs.csv", 3, Duration::from_secs(5))
    }

    fn unavailable() -> StorageError {
        StorageError::ServiceUnavailable {
            message: "503".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let storage = FlakyStorage::failing_times(2, unavailable());

        let report = upload_with_backoff(&storage, &target(), Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(report.delays, vec![Duration::from_secs(5), Duration::from_secs(10)]);
        assert_eq!(storage.put_calls(), 3);
        assert!(storage.inner().exists(&target().key).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_exact_attempts() {
        let storage = FlakyStorage::always_failing(unavailable());

        let err = upload_with_backoff(&storage, &target(), Bytes::from_static(b"x"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(storage.put_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_bucket_is_not_retried_and_surfaces() {
        let storage = FlakyStorage::always_failing(StorageError::NoSuchBucket {
            bucket: "spotify-project1".into(),
        });

        let err = upload_with_backoff(&storage, &target(), Bytes::from_static(b"x"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::BucketNotFound { .. }));
        assert_eq!(storage.put_calls(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_fail_fast() {
        let storage = FlakyStorage::always_failing(StorageError::Other {
            message: "AccessDenied".into(),
        });

        let err = upload_with_backoff(&storage, &target(), Bytes::from_static(b"x"))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Failed { .. }));
        assert_eq!(storage.put_calls(), 1);
    }
}
