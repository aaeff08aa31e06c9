//! Trigger classification and normalization
//!
//! The handler is invoked with either an object-created notification or an
//! API Gateway proxy request. Neither carries a shared type tag, so the shape
//! of the payload decides which one it is. Everything downstream works on
//! [`ProcessingRequest`] and never sees the raw payload.

use crate::image::codec;
use crate::models::{Config, ImageSource, ProcessingRequest};
use crate::storage::keys;
use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// A classified trigger payload.
#[derive(Debug)]
pub enum Trigger {
    /// One entry per notification record. A malformed record is an error in
    /// its own slot and does not invalidate its neighbours.
    StorageNotification(Vec<Result<StorageRecord>>),
    /// A payload shaped like a proxy request. A request that fails to parse
    /// still belongs to an HTTP caller and is answered with a response.
    HttpUpload(Result<HttpUploadRequest>),
}

/// Bucket and (URL-decoded) key of one created object.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRecord {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
struct S3EventRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

#[derive(Debug, Deserialize)]
struct EventBridgeEvent {
    detail: S3Entity,
}

impl From<S3Entity> for StorageRecord {
    fn from(entity: S3Entity) -> Self {
        Self {
            bucket: entity.bucket.name,
            key: decode_key(&entity.object.key),
        }
    }
}

/// API Gateway proxy request, reduced to the fields the upload path reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpUploadRequest {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: Option<bool>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
}

impl Trigger {
    pub fn classify(payload: &Value) -> Result<Self> {
        if let Some(records) = payload.get("Records").and_then(Value::as_array) {
            if records.iter().any(|record| record.get("s3").is_some()) {
                let parsed = records
                    .iter()
                    .map(|record| {
                        serde_json::from_value::<S3EventRecord>(record.clone())
                            .map(|record| StorageRecord::from(record.s3))
                            .map_err(|e| {
                                Error::UnrecognizedTriggerShape(format!(
                                    "malformed storage record: {}",
                                    e
                                ))
                            })
                    })
                    .collect();
                return Ok(Trigger::StorageNotification(parsed));
            }
        }

        if let Some(detail) = payload.get("detail") {
            if detail.get("bucket").is_some() && detail.get("object").is_some() {
                let event: EventBridgeEvent =
                    serde_json::from_value(payload.clone()).map_err(|e| {
                        Error::UnrecognizedTriggerShape(format!("malformed object event: {}", e))
                    })?;
                return Ok(Trigger::StorageNotification(vec![Ok(event.detail.into())]));
            }
        }

        const HTTP_FIELDS: [&str; 4] = ["body", "httpMethod", "requestContext", "isBase64Encoded"];
        if HTTP_FIELDS.iter().any(|field| payload.get(field).is_some()) {
            let request = serde_json::from_value::<HttpUploadRequest>(payload.clone())
                .map_err(|e| Error::UnrecognizedTriggerShape(format!("malformed request: {}", e)));
            return Ok(Trigger::HttpUpload(request));
        }

        Err(Error::UnrecognizedTriggerShape(describe_shape(payload)))
    }
}

fn describe_shape(payload: &Value) -> String {
    match payload {
        Value::Object(map) => {
            let fields: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("object with fields [{}]", fields.join(", "))
        }
        Value::Array(_) => "array".to_string(),
        Value::Null => "null".to_string(),
        _ => "scalar".to_string(),
    }
}

/// Notification keys are form-encoded: `+` is a space and the rest is
/// percent-encoded.
pub fn decode_key(key: &str) -> String {
    let with_spaces = key.replace('+', " ");
    urlencoding::decode(&with_spaces)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(with_spaces)
}

/// Requests for the records under the upload prefix. Keys outside it are
/// skipped: the notification was scoped wider than it should have been.
pub fn storage_requests(
    records: Vec<Result<StorageRecord>>,
    config: &Config,
) -> Vec<Result<ProcessingRequest>> {
    records
        .into_iter()
        .filter_map(|record| {
            let record = match record {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            match ProcessingRequest::new(&record.bucket, &record.key, ImageSource::Stored, config)
            {
                Err(Error::InvalidKey(key)) => {
                    info!(bucket = %record.bucket, key = %key, "Skipping key outside upload prefix");
                    None
                }
                other => Some(other),
            }
        })
        .collect()
}

impl HttpUploadRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }

    fn query_param(&self, name: &str) -> Option<&str> {
        self.query_string_parameters
            .as_ref()
            .and_then(|params| params.get(name))
            .map(String::as_str)
    }

    /// Raw body bytes. Flagged bodies must be valid base64; unflagged bodies
    /// are tried as base64 first and otherwise taken as they are.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        let body = self.body.as_deref().unwrap_or_default();
        let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();

        if self.is_base64_encoded.unwrap_or(false) {
            return BASE64
                .decode(compact.as_bytes())
                .map_err(|e| Error::CorruptImage(format!("body is not valid base64: {}", e)));
        }

        match BASE64.decode(compact.as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => {
                debug!("Unflagged body decoded as base64");
                Ok(bytes)
            }
            _ => Ok(latin1_bytes(body)),
        }
    }

    /// Boundary of a `multipart/form-data` body, if the request has one.
    fn multipart_boundary(&self) -> Option<String> {
        let content_type = self.header("content-type")?;
        let mut params = content_type.split(';').map(str::trim);
        let mime = params.next()?;
        if !mime.eq_ignore_ascii_case("multipart/form-data") {
            return None;
        }
        params.find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
        })
    }
}

/// Text bodies that arrive as binary mapped one char per byte.
fn latin1_bytes(body: &str) -> Vec<u8> {
    if body.chars().all(|c| (c as u32) < 256) {
        body.chars().map(|c| c as u8).collect()
    } else {
        body.as_bytes().to_vec()
    }
}

/// One file extracted from a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartFile {
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// The part carrying a filename, or the first part when none does.
pub fn extract_multipart(body: &[u8], boundary: &str) -> Result<MultipartFile> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut parts = Vec::new();
    let mut cursor = find(body, &delimiter, 0);

    while let Some(start) = cursor {
        let after = start + delimiter.len();
        if body[after..].starts_with(b"--") {
            break;
        }
        let Some(next) = find(body, &delimiter, after) else {
            break;
        };
        if let Some(part) = parse_part(&body[after..next]) {
            parts.push(part);
        }
        cursor = Some(next);
    }

    let index = parts
        .iter()
        .position(|part| part.filename.is_some())
        .unwrap_or(0);
    if parts.is_empty() {
        return Err(Error::CorruptImage(
            "multipart body contains no parts".to_string(),
        ));
    }
    Ok(parts.swap_remove(index))
}

fn parse_part(raw: &[u8]) -> Option<MultipartFile> {
    let raw = raw.strip_prefix(b"\r\n").unwrap_or(raw);
    let header_end = find(raw, b"\r\n\r\n", 0)?;
    let headers = String::from_utf8_lossy(&raw[..header_end]);
    let content = &raw[header_end + 4..];
    let content = content.strip_suffix(b"\r\n").unwrap_or(content);

    let filename = headers
        .lines()
        .filter(|line| {
            line.to_ascii_lowercase()
                .starts_with("content-disposition:")
        })
        .flat_map(|line| line.split(';'))
        .find_map(|param| {
            let (name, value) = param.trim().split_once('=')?;
            name.eq_ignore_ascii_case("filename")
                .then(|| value.trim_matches('"').to_string())
        })
        .filter(|name| !name.is_empty());

    Some(MultipartFile {
        filename,
        data: content.to_vec(),
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|position| position + from)
}

/// Normalize an upload into a request for `{bucket}/{upload_prefix}{filename}`.
///
/// The filename comes from the `filename` query parameter, then from the
/// multipart part, and is generated from the detected format otherwise.
pub fn http_request(request: &HttpUploadRequest, config: &Config) -> Result<ProcessingRequest> {
    let body = request.decode_body()?;

    let (data, part_filename) = match request.multipart_boundary() {
        Some(boundary) => {
            let file = extract_multipart(&body, &boundary)?;
            (file.data, file.filename)
        }
        None => (body, None),
    };

    if data.is_empty() {
        return Err(Error::CorruptImage("empty request body".to_string()));
    }

    let filename = request
        .query_param("filename")
        .and_then(keys::sanitize_filename)
        .or_else(|| part_filename.as_deref().and_then(keys::sanitize_filename))
        .unwrap_or_else(|| generated_filename(&data));

    let key = format!("{}{}", config.upload_prefix, filename);
    ProcessingRequest::new(&config.bucket_name, &key, ImageSource::Inline(data), config)
}

fn generated_filename(data: &[u8]) -> String {
    match codec::detect_format(data) {
        Ok(format) => format!("image_{}.{}", Uuid::new_v4(), format.extension()),
        Err(_) => format!("image_{}", Uuid::new_v4()),
    }
}
