//! Data models and structures
//!
//! Defines the runtime configuration, the normalized unit of work, and the
//! metadata record persisted for every processed image.

use crate::image::Format;
use crate::storage::keys;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_UPLOAD_PREFIX: &str = "uploads/";
pub const DEFAULT_RESIZED_PREFIX: &str = "resized/";
pub const DEFAULT_TABLE_NAME: &str = "image_metadata";
pub const DEFAULT_TARGET_WIDTH: u32 = 800;
pub const DEFAULT_TIMEOUT_SECS: u64 = 25;

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bucket_name: String,
    pub upload_prefix: String,
    pub resized_prefix: String,
    pub table_name: String,
    pub target_width: u32,
    pub timeout: Duration,
    pub dry_run: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let target_width = match lookup("TARGET_WIDTH") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                Error::Config(format!("TARGET_WIDTH must be a positive integer, got '{}'", raw))
            })?,
            None => DEFAULT_TARGET_WIDTH,
        };
        let timeout_secs = match lookup("PROCESSING_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!(
                    "PROCESSING_TIMEOUT_SECS must be a positive integer, got '{}'",
                    raw
                ))
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let dry_run = lookup("DRY_RUN")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let config = Self {
            bucket_name: lookup("BUCKET_NAME")
                .ok_or_else(|| Error::Config("BUCKET_NAME not set".to_string()))?,
            upload_prefix: lookup("UPLOAD_PREFIX")
                .unwrap_or_else(|| DEFAULT_UPLOAD_PREFIX.to_string()),
            resized_prefix: lookup("RESIZED_PREFIX")
                .unwrap_or_else(|| DEFAULT_RESIZED_PREFIX.to_string()),
            table_name: lookup("DDB_TABLE").unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
            target_width,
            timeout: Duration::from_secs(timeout_secs),
            dry_run,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bucket_name.trim().is_empty() {
            return Err(Error::Config("BUCKET_NAME is empty".to_string()));
        }
        if self.upload_prefix.is_empty() || self.resized_prefix.is_empty() {
            return Err(Error::Config(
                "UPLOAD_PREFIX and RESIZED_PREFIX must be non-empty".to_string(),
            ));
        }
        // Output under the upload prefix would trigger another round of processing.
        if self.resized_prefix.starts_with(&self.upload_prefix)
            || self.upload_prefix.starts_with(&self.resized_prefix)
        {
            return Err(Error::Config(format!(
                "UPLOAD_PREFIX '{}' and RESIZED_PREFIX '{}' overlap",
                self.upload_prefix, self.resized_prefix
            )));
        }
        if self.target_width == 0 {
            return Err(Error::Config("TARGET_WIDTH must be greater than 0".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config(
                "PROCESSING_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the source bytes of a request come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Carried in the trigger itself (HTTP upload).
    Inline(Vec<u8>),
    /// Must be fetched from the object store (storage notification).
    Stored,
}

/// The normalized unit of work, independent of the trigger that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingRequest {
    pub source_bucket: String,
    pub source_key: String,
    pub image_id: String,
    pub resized_key: String,
    pub source: ImageSource,
}

impl ProcessingRequest {
    pub fn new(bucket: &str, key: &str, source: ImageSource, config: &Config) -> Result<Self> {
        if bucket.is_empty() {
            return Err(Error::UnrecognizedTriggerShape(format!(
                "empty bucket for key '{}'",
                key
            )));
        }
        let image_id = keys::image_id(key, &config.upload_prefix)
            .ok_or_else(|| Error::InvalidKey(key.to_string()))?;
        let resized_key = keys::resized_key(key, &config.upload_prefix, &config.resized_prefix)
            .ok_or_else(|| Error::InvalidKey(key.to_string()))?;

        Ok(Self {
            source_bucket: bucket.to_string(),
            source_key: key.to_string(),
            image_id,
            resized_key,
            source,
        })
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.source, ImageSource::Inline(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    Success,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Success => "SUCCESS",
            RecordStatus::Failed => "FAILED",
        }
    }
}

/// Outcome of one processing attempt, keyed by `image_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    pub image_id: String,
    pub source_key: String,
    pub resized_key: String,
    pub original_width: Option<u32>,
    pub original_height: Option<u32>,
    pub resized_width: Option<u32>,
    pub resized_height: Option<u32>,
    pub format: Option<Format>,
    pub resized_size_bytes: Option<u64>,
    pub status: RecordStatus,
    pub processed_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl ProcessingRecord {
    pub fn failed(request: &ProcessingRequest, error: &Error, processed_at: DateTime<Utc>) -> Self {
        Self {
            image_id: request.image_id.clone(),
            source_key: request.source_key.clone(),
            resized_key: request.resized_key.clone(),
            original_width: None,
            original_height: None,
            resized_width: None,
            resized_height: None,
            format: None,
            resized_size_bytes: None,
            status: RecordStatus::Failed,
            processed_at,
            error_message: Some(error.describe()),
        }
    }

    /// Two records describe the same outcome, ignoring when they were written.
    pub fn same_outcome(&self, other: &ProcessingRecord) -> bool {
        Self {
            processed_at: other.processed_at,
            ..self.clone()
        } == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    fn test_config() -> Config {
        Config::from_lookup(lookup(&[("BUCKET_NAME", "photos")])).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = test_config();
        assert_eq!(config.bucket_name, "photos");
        assert_eq!(config.upload_prefix, "uploads/");
        assert_eq!(config.resized_prefix, "resized/");
        assert_eq!(config.table_name, "image_metadata");
        assert_eq!(config.target_width, 800);
        assert_eq!(config.timeout, Duration::from_secs(25));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_config_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("BUCKET_NAME", "photos"),
            ("UPLOAD_PREFIX", "in/"),
            ("RESIZED_PREFIX", "out/"),
            ("DDB_TABLE", "records"),
            ("TARGET_WIDTH", "640"),
            ("PROCESSING_TIMEOUT_SECS", "10"),
            ("DRY_RUN", "true"),
        ]))
        .unwrap();
        assert_eq!(config.upload_prefix, "in/");
        assert_eq!(config.resized_prefix, "out/");
        assert_eq!(config.table_name, "records");
        assert_eq!(config.target_width, 640);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.dry_run);
    }

    #[test]
    fn test_config_requires_bucket() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("BUCKET_NAME"));
    }

    #[test]
    fn test_config_rejects_bad_width() {
        for width in ["0", "wide", "-5"] {
            let result =
                Config::from_lookup(lookup(&[("BUCKET_NAME", "photos"), ("TARGET_WIDTH", width)]));
            assert!(matches!(result, Err(Error::Config(_))), "width {}", width);
        }
    }

    #[test]
    fn test_config_rejects_overlapping_prefixes() {
        let result = Config::from_lookup(lookup(&[
            ("BUCKET_NAME", "photos"),
            ("UPLOAD_PREFIX", "images/"),
            ("RESIZED_PREFIX", "images/small/"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_request_derives_keys() {
        let config = test_config();
        let request =
            ProcessingRequest::new("photos", "uploads/a/b.jpg", ImageSource::Stored, &config)
                .unwrap();
        assert_eq!(request.image_id, "a/b.jpg");
        assert_eq!(request.resized_key, "resized/a/b.jpg");
        assert!(!request.is_inline());
    }

    #[test]
    fn test_request_rejects_foreign_key() {
        let config = test_config();
        let err = ProcessingRequest::new("photos", "other/a.jpg", ImageSource::Stored, &config)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidKey(_)));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let config = test_config();
        let request =
            ProcessingRequest::new("photos", "uploads/doc.txt", ImageSource::Stored, &config)
                .unwrap();
        let record = ProcessingRecord::failed(
            &request,
            &Error::UnsupportedFormat("unknown".into()),
            Utc::now(),
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["imageId"], "doc.txt");
        assert_eq!(json["status"], "FAILED");
        assert!(json["errorMessage"]
            .as_str()
            .unwrap()
            .starts_with("UnsupportedFormat"));
    }
}
