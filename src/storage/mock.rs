use super::ObjectStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchFailure {
    AccessDenied,
    Unavailable,
}

/// In-memory object store. Clones share state, so a test can keep a handle
/// after handing the store to the app.
#[derive(Clone, Default)]
pub struct MockObjectStore {
    objects: Arc<Mutex<HashMap<(String, String), StoredObject>>>,
    fetch_failures: Arc<Mutex<HashMap<String, FetchFailure>>>,
    fail_writes_under: Arc<Mutex<Option<String>>>,
    fetch_count: Arc<Mutex<usize>>,
    store_count: Arc<Mutex<usize>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, data: Vec<u8>) -> Self {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: "application/octet-stream".to_string(),
            },
        );
        self
    }

    pub fn with_fetch_failure(self, key: &str, failure: FetchFailure) -> Self {
        self.fetch_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), failure);
        self
    }

    /// Every write to a key starting with `prefix` fails.
    pub fn with_write_failure(self, prefix: &str) -> Self {
        *self.fail_writes_under.lock().unwrap() = Some(prefix.to_string());
        self
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys currently stored in `bucket` under `prefix`, sorted.
    pub fn keys_under(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn get_fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap()
    }

    pub fn get_store_count(&self) -> usize {
        *self.store_count.lock().unwrap()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        *self.fetch_count.lock().unwrap() += 1;

        if let Some(failure) = self.fetch_failures.lock().unwrap().get(key) {
            return Err(match failure {
                FetchFailure::AccessDenied => Error::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                FetchFailure::Unavailable => {
                    Error::FetchFailed(format!("s3://{}/{}: service unavailable", bucket, key))
                }
            });
        }

        self.get_object(bucket, key)
            .map(|object| object.data)
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn store(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        *self.store_count.lock().unwrap() += 1;

        if let Some(prefix) = self.fail_writes_under.lock().unwrap().as_deref() {
            if key.starts_with(prefix) {
                return Err(Error::WriteFailed(format!(
                    "s3://{}/{}: mock write failure",
                    bucket, key
                )));
            }
        }

        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
