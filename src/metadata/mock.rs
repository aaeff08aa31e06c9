use super::MetadataStore;
use crate::models::ProcessingRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct MockMetadataStore {
    records: Arc<Mutex<HashMap<String, ProcessingRecord>>>,
    upsert_count: Arc<Mutex<usize>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    pub fn get_record(&self, image_id: &str) -> Option<ProcessingRecord> {
        self.records.lock().unwrap().get(image_id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get_upsert_count(&self) -> usize {
        *self.upsert_count.lock().unwrap()
    }
}

#[async_trait]
impl MetadataStore for MockMetadataStore {
    async fn upsert(&self, record: &ProcessingRecord) -> Result<()> {
        *self.upsert_count.lock().unwrap() += 1;

        if *self.should_fail.lock().unwrap() {
            return Err(Error::MetadataWriteFailed(format!(
                "mock failure for {}",
                record.image_id
            )));
        }

        self.records
            .lock()
            .unwrap()
            .insert(record.image_id.clone(), record.clone());
        Ok(())
    }
}
