use super::ObjectStore;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, error};

/// S3-backed store. One instance lives for the whole execution environment.
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: S3Client::new(config),
        }
    }

    fn classify_fetch_error(bucket: &str, key: &str, err: SdkError<GetObjectError>) -> Error {
        if let Some(service_error) = err.as_service_error() {
            if service_error.is_no_such_key() {
                return Error::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                };
            }
            if matches!(service_error.code(), Some("AccessDenied")) {
                return Error::AccessDenied {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                };
            }
        }
        Error::FetchFailed(format!(
            "s3://{}/{}: {}",
            bucket,
            key,
            DisplayErrorContext(&err)
        ))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let err = Self::classify_fetch_error(bucket, key, e);
                error!(bucket = %bucket, key = %key, kind = err.kind(), "S3 fetch failed");
                err
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| Error::FetchFailed(format!("Failed to read body of {}: {}", key, e)))?;

        let data = bytes.into_bytes().to_vec();
        debug!(bucket = %bucket, key = %key, size_bytes = data.len(), "Fetched object");
        Ok(data)
    }

    async fn store(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        let body = ByteStream::from(data.to_vec());

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                error!(bucket = %bucket, key = %key, "S3 write failed");
                Error::WriteFailed(format!("s3://{}/{}: {}", bucket, key, DisplayErrorContext(&e)))
            })?;

        debug!(bucket = %bucket, key = %key, size_bytes = data.len(), "Stored object");
        Ok(())
    }
}
