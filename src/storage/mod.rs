//! Object store gateway
//!
//! Reads uploaded originals and writes resized results to S3. The pipeline
//! only sees the [`ObjectStore`] trait; [`S3ObjectStore`] talks to the real
//! bucket and [`MockObjectStore`] keeps objects in memory.

pub mod client;
pub mod keys;
pub mod mock;

pub use client::S3ObjectStore;
pub use mock::MockObjectStore;

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fails with `ObjectNotFound` or `AccessDenied` as distinct kinds.
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    /// Overwrites any existing object at `key`. Fails with `WriteFailed`.
    async fn store(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> Result<()>;
}
