//! Object storage that fails on purpose.

use crate::errors::StorageError;
use crate::storage::{ObjectStorage, ObjectStoreStorage};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

/// In-memory storage whose `put` fails a set number of times first.
#[derive(Debug)]
pub struct FlakyStorage {
    inner: ObjectStoreStorage,
    error: StorageError,
    remaining_failures: Mutex<Option<usize>>,
    put_calls: Mutex<usize>,
}

impl FlakyStorage {
    /// Fails the first `times` puts with `error`, then stores normally.
    pub fn failing_times(times: usize, error: StorageError) -> Self {
        Self {
            inner: ObjectStoreStorage::in_memory("spotify-project1"),
            error,
            remaining_failures: Mutex::new(Some(times)),
            put_calls: Mutex::new(0),
        }
    }

    /// Fails every put with `error`.
    pub fn always_failing(error: StorageError) -> Self {
        Self {
            remaining_failures: Mutex::new(None),
            ..Self::failing_times(0, error)
        }
    }

    /// Number of `put` calls seen.
    pub fn put_calls(&self) -> usize {
        *self.put_calls.lock()
    }

    /// The backing store.
    pub fn inner(&self) -> &ObjectStoreStorage {
        &self.inner
    }
}

#[async_trait]
impl ObjectStorage for FlakyStorage {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        *self.put_calls.lock() += 1;
        let fail = {
            let mut remaining = self.remaining_failures.lock();
            match remaining.as_mut() {
                None => true,
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
            }
        };
        if fail {
            return Err(self.error.clone());
        }
        self.inner.put(key, body).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.inner.get(key).await
    }
}
