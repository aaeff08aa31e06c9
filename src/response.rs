//! HTTP responses for the upload path.
//!
//! Storage notifications produce no response; their outcome is the resized
//! object plus the processing record. Uploads always get a JSON body.

use crate::image::Format;
use crate::Error;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// API Gateway proxy response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

/// Body of a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub message: String,
    pub image_id: String,
    pub source_key: String,
    pub resized_key: String,
    pub resized_url: String,
    pub format: Format,
    pub original_width: u32,
    pub original_height: u32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub metadata_recorded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Status for every error the pipeline can raise. Problems with the upload
/// itself are the caller's (4xx); collaborator failures are ours (5xx).
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::UnrecognizedTriggerShape(_) | Error::InvalidKey(_) | Error::CorruptImage(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Error::InvalidDimensions(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::ObjectNotFound { .. }
        | Error::AccessDenied { .. }
        | Error::FetchFailed(_)
        | Error::WriteFailed(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::EncodeFailed(_)
        | Error::MetadataWriteFailed(_)
        | Error::Config(_)
        | Error::Internal(_)
        | Error::Io(_)
        | Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl HttpResponse {
    fn json<T: Serialize>(status: StatusCode, body: &T) -> Self {
        let body = serde_json::to_string(body).unwrap_or_else(|e| {
            format!(
                "{{\"error\":\"Serialization\",\"message\":\"{}\"}}",
                e.to_string().replace('"', "'")
            )
        });
        Self {
            status_code: status.as_u16(),
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            body,
            is_base64_encoded: false,
        }
    }

    pub fn success(summary: &UploadSummary) -> Self {
        Self::json(StatusCode::OK, summary)
    }

    pub fn from_error(error: &Error) -> Self {
        Self::json(
            status_for(error),
            &ErrorBody {
                error: error.kind().to_string(),
                message: error.to_string(),
            },
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}
