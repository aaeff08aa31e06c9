use super::MetadataStore;
use crate::models::ProcessingRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use std::collections::HashMap;
use tracing::{debug, error};

pub struct DynamoDbMetadataStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoDbMetadataStore {
    pub fn new(config: &SdkConfig, table_name: String) -> Self {
        Self {
            client: DynamoDbClient::new(config),
            table_name,
        }
    }

    /// Table row for a record. Absent optional fields are omitted rather than
    /// stored as NULL.
    pub fn to_item(record: &ProcessingRecord) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("imageId".to_string(), AttributeValue::S(record.image_id.clone()));
        item.insert("sourceKey".to_string(), AttributeValue::S(record.source_key.clone()));
        item.insert("resizedKey".to_string(), AttributeValue::S(record.resized_key.clone()));
        item.insert(
            "status".to_string(),
            AttributeValue::S(record.status.as_str().to_string()),
        );
        item.insert(
            "processedAt".to_string(),
            AttributeValue::S(record.processed_at.to_rfc3339()),
        );

        let numbers = [
            ("originalWidth", record.original_width.map(u64::from)),
            ("originalHeight", record.original_height.map(u64::from)),
            ("resizedWidth", record.resized_width.map(u64::from)),
            ("resizedHeight", record.resized_height.map(u64::from)),
            ("resizedSizeBytes", record.resized_size_bytes),
        ];
        for (name, value) in numbers {
            if let Some(value) = value {
                item.insert(name.to_string(), AttributeValue::N(value.to_string()));
            }
        }
        if let Some(format) = record.format {
            item.insert(
                "format".to_string(),
                AttributeValue::S(format.name().to_string()),
            );
        }
        if let Some(message) = &record.error_message {
            item.insert("errorMessage".to_string(), AttributeValue::S(message.clone()));
        }
        item
    }
}

#[async_trait]
impl MetadataStore for DynamoDbMetadataStore {
    async fn upsert(&self, record: &ProcessingRecord) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(Self::to_item(record)))
            .send()
            .await
            .map_err(|e| {
                error!(
                    table = %self.table_name,
                    image_id = %record.image_id,
                    "DynamoDB put_item failed"
                );
                Error::MetadataWriteFailed(format!(
                    "{} ({}): {}",
                    self.table_name,
                    record.image_id,
                    DisplayErrorContext(&e)
                ))
            })?;

        debug!(
            table = %self.table_name,
            image_id = %record.image_id,
            status = record.status.as_str(),
            "Recorded processing outcome"
        );
        Ok(())
    }
}
