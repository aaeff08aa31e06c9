//! Metadata recorder
//!
//! Persists one [`ProcessingRecord`](crate::models::ProcessingRecord) per
//! image id. Writes replace the whole row, so the last writer wins and a
//! redelivered trigger converges on the same record.

pub mod client;
pub mod mock;

pub use client::DynamoDbMetadataStore;
pub use mock::MockMetadataStore;

use crate::models::ProcessingRecord;
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the record keyed by `record.image_id`.
    async fn upsert(&self, record: &ProcessingRecord) -> Result<()>;
}
