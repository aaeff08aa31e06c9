//! Invocation handling: classify the trigger, run each request through the
//! fetch → transform → store → record pipeline, and apply the error policy of
//! the path it came in on.

use crate::event::{self, HttpUploadRequest, StorageRecord, Trigger};
use crate::image::{Format, ImageProcessor};
use crate::metadata::{DynamoDbMetadataStore, MetadataStore, MockMetadataStore};
use crate::models::{Config, ImageSource, ProcessingRecord, ProcessingRequest, RecordStatus};
use crate::response::{HttpResponse, UploadSummary};
use crate::storage::{MockObjectStore, ObjectStore, S3ObjectStore};
use crate::{Error, Result};
use aws_config::BehaviorVersion;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Long-lived handler state. Built once per execution environment and shared
/// by every invocation; nothing in it changes per request.
pub struct App {
    config: Config,
    store: Box<dyn ObjectStore>,
    metadata: Box<dyn MetadataStore>,
    processor: ImageProcessor,
}

/// Injectable collaborators used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub store: Box<dyn ObjectStore>,
    pub metadata: Box<dyn MetadataStore>,
}

/// What one successfully processed request produced.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub record: ProcessingRecord,
    pub format: Format,
    pub original_width: u32,
    pub original_height: u32,
    pub resized_width: u32,
    pub resized_height: u32,
    /// False when the resized object was written but the record was not.
    pub metadata_recorded: bool,
}

impl App {
    /// Build an app from concrete collaborators.
    pub fn with_services(services: AppServices, config: Config) -> Self {
        Self {
            processor: ImageProcessor::new(config.target_width),
            config,
            store: services.store,
            metadata: services.metadata,
        }
    }

    /// Construct an app from environment configuration (`Config::from_env`).
    pub async fn new() -> Result<Self> {
        let config = Config::from_env()?;

        let services = if config.dry_run {
            info!("DRY_RUN enabled, objects and records are kept in memory");
            AppServices {
                store: Box::new(MockObjectStore::new()),
                metadata: Box::new(MockMetadataStore::new()),
            }
        } else {
            let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
            AppServices {
                store: Box::new(S3ObjectStore::new(&sdk_config)),
                metadata: Box::new(DynamoDbMetadataStore::new(
                    &sdk_config,
                    config.table_name.clone(),
                )),
            }
        };

        info!(
            bucket = %config.bucket_name,
            upload_prefix = %config.upload_prefix,
            resized_prefix = %config.resized_prefix,
            table = %config.table_name,
            target_width = config.target_width,
            "Handler initialized"
        );
        Ok(Self::with_services(services, config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Entry point for one invocation. Storage notifications return `null`;
    /// uploads return the serialized [`HttpResponse`].
    pub async fn handle(&self, payload: Value) -> Result<Value> {
        let deadline = Instant::now() + self.config.timeout;

        match Trigger::classify(&payload) {
            Ok(Trigger::StorageNotification(records)) => {
                info!(records = records.len(), "Processing storage notification");
                self.handle_storage_notification(records, deadline).await?;
                Ok(Value::Null)
            }
            Ok(Trigger::HttpUpload(request)) => {
                info!("Processing HTTP upload");
                let response = match request {
                    Ok(request) => self.handle_http_upload(&request, deadline).await,
                    Err(e) => {
                        warn!(kind = e.kind(), error = %e, "Rejecting malformed upload request");
                        HttpResponse::from_error(&e)
                    }
                };
                Ok(serde_json::to_value(response)?)
            }
            Err(e) => {
                error!(error = %e, "Rejecting invocation");
                Err(e)
            }
        }
    }

    /// Process every record independently. Input errors end with a FAILED
    /// record and are otherwise swallowed; the first transient error is
    /// returned once all records were attempted so the trigger redelivers.
    pub async fn handle_storage_notification(
        &self,
        records: Vec<Result<StorageRecord>>,
        deadline: Instant,
    ) -> Result<()> {
        let mut retryable: Option<Error> = None;

        for request in event::storage_requests(records, &self.config) {
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed notification record");
                    continue;
                }
            };

            if Instant::now() >= deadline {
                warn!(key = %request.source_key, "Invocation budget spent before processing");
                retryable.get_or_insert(Error::Timeout(self.config.timeout.as_secs()));
                break;
            }

            match self.process(&request, deadline).await {
                Ok(outcome) => info!(
                    image_id = %request.image_id,
                    resized_key = %request.resized_key,
                    width = outcome.resized_width,
                    height = outcome.resized_height,
                    "Processed image"
                ),
                Err(e) if e.is_terminal() => warn!(
                    image_id = %request.image_id,
                    kind = e.kind(),
                    error = %e,
                    "Image cannot be processed, recorded as failed"
                ),
                Err(e) => {
                    error!(
                        image_id = %request.image_id,
                        kind = e.kind(),
                        error = %e,
                        "Processing failed, leaving the notification for redelivery"
                    );
                    retryable.get_or_insert(e);
                }
            }
        }

        match retryable {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Every outcome, including failures, becomes a JSON response.
    pub async fn handle_http_upload(
        &self,
        upload: &HttpUploadRequest,
        deadline: Instant,
    ) -> HttpResponse {
        let request = match event::http_request(upload, &self.config) {
            Ok(request) => request,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Rejecting upload");
                return HttpResponse::from_error(&e);
            }
        };

        match self.process(&request, deadline).await {
            Ok(outcome) => HttpResponse::success(&UploadSummary {
                message: "Image uploaded and processed".to_string(),
                image_id: request.image_id.clone(),
                source_key: request.source_key.clone(),
                resized_url: format!("s3://{}/{}", request.source_bucket, request.resized_key),
                resized_key: request.resized_key.clone(),
                format: outcome.format,
                original_width: outcome.original_width,
                original_height: outcome.original_height,
                resized_width: outcome.resized_width,
                resized_height: outcome.resized_height,
                metadata_recorded: outcome.metadata_recorded,
            }),
            Err(e) => {
                warn!(image_id = %request.image_id, kind = e.kind(), error = %e, "Upload failed");
                HttpResponse::from_error(&e)
            }
        }
    }

    /// Run one request under the invocation deadline. Failures after the
    /// source bytes were obtained leave a FAILED record behind.
    pub async fn process(
        &self,
        request: &ProcessingRequest,
        deadline: Instant,
    ) -> Result<ProcessingOutcome> {
        let result = match tokio::time::timeout_at(deadline, self.run_pipeline(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.config.timeout.as_secs())),
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fetch_error() => {
                warn!(
                    bucket = %request.source_bucket,
                    key = %request.source_key,
                    kind = e.kind(),
                    "Source object unavailable"
                );
                Err(e)
            }
            Err(e) => {
                self.record_failure(request, &e).await;
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, request: &ProcessingRequest) -> Result<ProcessingOutcome> {
        let data = match &request.source {
            ImageSource::Inline(bytes) => Arc::new(bytes.clone()),
            ImageSource::Stored => Arc::new(
                self.store
                    .fetch(&request.source_bucket, &request.source_key)
                    .await?,
            ),
        };

        let output = self.processor.transform_blocking(Arc::clone(&data)).await?;
        let content_type = output.format.content_type();

        if request.is_inline() {
            self.store
                .store(&request.source_bucket, &request.source_key, &data, content_type)
                .await?;
            info!(key = %request.source_key, "Stored original upload");
        }

        self.store
            .store(
                &request.source_bucket,
                &request.resized_key,
                &output.data,
                content_type,
            )
            .await?;

        let record = ProcessingRecord {
            image_id: request.image_id.clone(),
            source_key: request.source_key.clone(),
            resized_key: request.resized_key.clone(),
            original_width: Some(output.original_width),
            original_height: Some(output.original_height),
            resized_width: Some(output.resized_width),
            resized_height: Some(output.resized_height),
            format: Some(output.format),
            resized_size_bytes: Some(output.data.len() as u64),
            status: RecordStatus::Success,
            processed_at: Utc::now(),
            error_message: None,
        };

        // The resized object is already durable; a lost record is tolerated.
        let metadata_recorded = match self.metadata.upsert(&record).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    image_id = %request.image_id,
                    resized_key = %request.resized_key,
                    error = %e,
                    "Resized image stored but metadata write failed"
                );
                false
            }
        };

        Ok(ProcessingOutcome {
            record,
            format: output.format,
            original_width: output.original_width,
            original_height: output.original_height,
            resized_width: output.resized_width,
            resized_height: output.resized_height,
            metadata_recorded,
        })
    }

    async fn record_failure(&self, request: &ProcessingRequest, failure: &Error) {
        let record = ProcessingRecord::failed(request, failure, Utc::now());
        if let Err(e) = self.metadata.upsert(&record).await {
            error!(
                image_id = %request.image_id,
                failure = %failure,
                error = %e,
                "Could not record processing failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{App, AppServices};
    use crate::image::Format;
    use crate::metadata::MockMetadataStore;
    use crate::models::{Config, ImageSource, ProcessingRequest, RecordStatus};
    use crate::response::{ErrorBody, HttpResponse};
    use crate::storage::mock::FetchFailure;
    use crate::storage::{MockObjectStore, ObjectStore};
    use crate::{Error, Result};
    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use serde_json::json;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::time::Instant;

    const BUCKET: &str = "photos";

    fn config() -> Config {
        Config::from_lookup(|name| match name {
            "BUCKET_NAME" => Some(BUCKET.to_string()),
            "TARGET_WIDTH" => Some("64".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 90]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    fn build_app(store: MockObjectStore, metadata: MockMetadataStore) -> App {
        App::with_services(
            AppServices {
                store: Box::new(store),
                metadata: Box::new(metadata),
            },
            config(),
        )
    }

    fn notification(keys: &[&str]) -> serde_json::Value {
        let records: Vec<_> = keys
            .iter()
            .map(|key| json!({ "s3": { "bucket": { "name": BUCKET }, "object": { "key": key } } }))
            .collect();
        json!({ "Records": records })
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    /// Store whose fetch never finishes within a test's deadline.
    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn fetch(&self, _bucket: &str, _key: &str) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }

        async fn store(&self, _: &str, _: &str, _: &[u8], _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_storage_notification_processes_all_records() {
        let store = MockObjectStore::new()
            .with_object(BUCKET, "uploads/a.png", image_bytes(128, 96, ImageFormat::Png))
            .with_object(BUCKET, "uploads/b.jpg", image_bytes(200, 100, ImageFormat::Jpeg));
        let metadata = MockMetadataStore::new();
        let app = build_app(store.clone(), metadata.clone());

        let result = app
            .handle(notification(&["uploads/a.png", "uploads/b.jpg"]))
            .await
            .unwrap();

        assert!(result.is_null());
        assert_eq!(
            store.keys_under(BUCKET, "resized/"),
            vec!["resized/a.png".to_string(), "resized/b.jpg".to_string()]
        );
        let record = metadata.get_record("a.png").unwrap();
        assert_eq!(record.status, RecordStatus::Success);
        assert_eq!(record.resized_width, Some(64));
        assert_eq!(record.resized_height, Some(48));
        assert_eq!(
            store.get_object(BUCKET, "resized/b.jpg").unwrap().content_type,
            "image/jpeg"
        );
    }

    #[tokio::test]
    async fn test_terminal_failure_does_not_abort_batch() {
        let store = MockObjectStore::new()
            .with_object(BUCKET, "uploads/notes.txt", b"shopping list".to_vec())
            .with_object(BUCKET, "uploads/ok.png", image_bytes(100, 50, ImageFormat::Png));
        let metadata = MockMetadataStore::new();
        let app = build_app(store.clone(), metadata.clone());

        app.handle(notification(&["uploads/notes.txt", "uploads/ok.png"]))
            .await
            .unwrap();

        let failed = metadata.get_record("notes.txt").unwrap();
        assert_eq!(failed.status, RecordStatus::Failed);
        assert!(failed
            .error_message
            .unwrap()
            .starts_with("UnsupportedFormat"));
        assert_eq!(
            metadata.get_record("ok.png").unwrap().status,
            RecordStatus::Success
        );
    }

    #[tokio::test]
    async fn test_missing_object_is_retried_without_record() {
        let store = MockObjectStore::new()
            .with_object(BUCKET, "uploads/ok.png", image_bytes(100, 50, ImageFormat::Png));
        let metadata = MockMetadataStore::new();
        let app = build_app(store.clone(), metadata.clone());

        let err = app
            .handle(notification(&["uploads/late.png", "uploads/ok.png"]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ObjectNotFound { .. }));
        assert!(metadata.get_record("late.png").is_none());
        // The healthy record in the same batch still went through.
        assert!(store.get_object(BUCKET, "resized/ok.png").is_some());
    }

    #[tokio::test]
    async fn test_access_denied_surfaces_for_redelivery() {
        let store = MockObjectStore::new()
            .with_object(BUCKET, "uploads/a.png", image_bytes(100, 50, ImageFormat::Png))
            .with_fetch_failure("uploads/a.png", FetchFailure::AccessDenied);
        let app = build_app(store, MockMetadataStore::new());

        let err = app.handle(notification(&["uploads/a.png"])).await.unwrap_err();
        assert!(matches!(err, Error::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_write_failure_is_recorded_and_retried() {
        let store = MockObjectStore::new()
            .with_object(BUCKET, "uploads/a.png", image_bytes(100, 50, ImageFormat::Png))
            .with_write_failure("resized/");
        let metadata = MockMetadataStore::new();
        let app = build_app(store, metadata.clone());

        let err = app.handle(notification(&["uploads/a.png"])).await.unwrap_err();

        assert!(matches!(err, Error::WriteFailed(_)));
        let record = metadata.get_record("a.png").unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert!(record.error_message.unwrap().starts_with("WriteFailed"));
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retried_without_record() {
        let store = MockObjectStore::new()
            .with_object(BUCKET, "uploads/a.png", image_bytes(100, 50, ImageFormat::Png))
            .with_fetch_failure("uploads/a.png", FetchFailure::Unavailable);
        let metadata = MockMetadataStore::new();
        let app = build_app(store.clone(), metadata.clone());

        let err = app.handle(notification(&["uploads/a.png"])).await.unwrap_err();

        assert!(matches!(err, Error::FetchFailed(_)));
        assert_eq!(metadata.get_upsert_count(), 0);
        assert!(store.get_object(BUCKET, "resized/a.png").is_none());
    }

    #[tokio::test]
    async fn test_truncated_image_is_recorded_as_corrupt() {
        let mut truncated = image_bytes(64, 64, ImageFormat::Png);
        truncated.truncate(truncated.len() / 2);
        let store = MockObjectStore::new().with_object(BUCKET, "uploads/half.png", truncated);
        let metadata = MockMetadataStore::new();
        let app = build_app(store.clone(), metadata.clone());

        let result = app.handle(notification(&["uploads/half.png"])).await.unwrap();

        assert!(result.is_null());
        let record = metadata.get_record("half.png").unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert!(record.error_message.unwrap().starts_with("CorruptImage"));
        assert!(store.get_object(BUCKET, "resized/half.png").is_none());
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_resized_object() {
        let store = MockObjectStore::new()
            .with_object(BUCKET, "uploads/a.png", image_bytes(100, 50, ImageFormat::Png));
        let metadata = MockMetadataStore::new().with_failure(true);
        let app = build_app(store.clone(), metadata.clone());

        app.handle(notification(&["uploads/a.png"])).await.unwrap();

        assert!(store.get_object(BUCKET, "resized/a.png").is_some());
        assert_eq!(metadata.record_count(), 0);
        assert_eq!(metadata.get_upsert_count(), 1);
    }

    #[tokio::test]
    async fn test_keys_outside_prefix_are_ignored() {
        let store = MockObjectStore::new();
        let metadata = MockMetadataStore::new();
        let app = build_app(store.clone(), metadata.clone());

        app.handle(notification(&["resized/a.png", "other/b.png"]))
            .await
            .unwrap();

        assert_eq!(store.get_fetch_count(), 0);
        assert_eq!(metadata.get_upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_unrecognized_payload_fails_invocation() {
        let app = build_app(MockObjectStore::new(), MockMetadataStore::new());

        let err = app.handle(json!({ "ping": true })).await.unwrap_err();
        assert!(matches!(err, Error::UnrecognizedTriggerShape(_)));
    }

    #[tokio::test]
    async fn test_malformed_http_request_gets_json_error() {
        let metadata = MockMetadataStore::new();
        let app = build_app(MockObjectStore::new(), metadata.clone());

        let value = app
            .handle(json!({
                "httpMethod": "POST",
                "body": { "image": "x" },
                "isBase64Encoded": false
            }))
            .await
            .unwrap();

        let response: HttpResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.status_code, 400);
        let body: ErrorBody = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body.error, "UnrecognizedTriggerShape");
        assert_eq!(metadata.get_upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_records_failure() {
        let metadata = MockMetadataStore::new();
        let app = App::with_services(
            AppServices {
                store: Box::new(StalledStore),
                metadata: Box::new(metadata.clone()),
            },
            config(),
        );
        let request =
            ProcessingRequest::new(BUCKET, "uploads/slow.png", ImageSource::Stored, app.config())
                .unwrap();

        let deadline = Instant::now() + Duration::from_millis(20);
        let err = app.process(&request, deadline).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(
            metadata.get_record("slow.png").unwrap().status,
            RecordStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_deadline_bounds_image_work() {
        let store = MockObjectStore::new().with_object(
            BUCKET,
            "uploads/huge.png",
            image_bytes(4000, 3000, ImageFormat::Png),
        );
        let metadata = MockMetadataStore::new();
        let app = build_app(store.clone(), metadata.clone());
        let request =
            ProcessingRequest::new(BUCKET, "uploads/huge.png", ImageSource::Stored, app.config())
                .unwrap();

        let deadline = Instant::now() + Duration::from_millis(25);
        let err = app.process(&request, deadline).await.unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert!(Instant::now() < deadline + Duration::from_millis(250));
        assert_eq!(
            metadata.get_record("huge.png").unwrap().status,
            RecordStatus::Failed
        );
        assert!(store.get_object(BUCKET, "resized/huge.png").is_none());
    }

    #[tokio::test]
    async fn test_spent_budget_stops_batch() {
        let store = MockObjectStore::new()
            .with_object(BUCKET, "uploads/a.png", image_bytes(100, 50, ImageFormat::Png));
        let app = build_app(store.clone(), MockMetadataStore::new());
        let trigger = crate::event::Trigger::classify(&notification(&["uploads/a.png"])).unwrap();
        let crate::event::Trigger::StorageNotification(records) = trigger else {
            panic!("expected storage notification");
        };

        let err = app
            .handle_storage_notification(records, Instant::now())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(store.get_fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_http_upload_stores_original_and_resized() {
        let store = MockObjectStore::new();
        let metadata = MockMetadataStore::new();
        let app = build_app(store.clone(), metadata.clone());
        let upload = crate::event::HttpUploadRequest {
            body: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                image_bytes(256, 128, ImageFormat::WebP),
            )),
            is_base64_encoded: Some(true),
            query_string_parameters: Some(
                [("filename".to_string(), "pano.webp".to_string())].into(),
            ),
            ..Default::default()
        };

        let response = app.handle_http_upload(&upload, far_deadline()).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(
            store.get_object(BUCKET, "uploads/pano.webp").unwrap().content_type,
            "image/webp"
        );
        let resized = store.get_object(BUCKET, "resized/pano.webp").unwrap();
        let decoded = image::load_from_memory(&resized.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
        assert_eq!(
            metadata.get_record("pano.webp").unwrap().format,
            Some(Format::WebP)
        );
    }

    #[tokio::test]
    async fn test_http_upload_failure_is_recorded() {
        let metadata = MockMetadataStore::new();
        let app = build_app(MockObjectStore::new(), metadata.clone());
        let upload = crate::event::HttpUploadRequest {
            body: Some("bm90IGFuIGltYWdl".to_string()),
            is_base64_encoded: Some(true),
            query_string_parameters: Some(
                [("filename".to_string(), "fake.png".to_string())].into(),
            ),
            ..Default::default()
        };

        let response = app.handle_http_upload(&upload, far_deadline()).await;

        assert_eq!(response.status_code, 415);
        assert_eq!(
            metadata.get_record("fake.png").unwrap().status,
            RecordStatus::Failed
        );
    }
}
