//! Error handling and custom error types
//!
//! Every failure the handler can observe is one variant of [`Error`]. The
//! variant decides whether the trigger should redeliver and, on the HTTP
//! path, which status code the caller sees.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Trigger payload matches neither a storage notification nor an HTTP request: {0}")]
    UnrecognizedTriggerShape(String),

    #[error("Key '{0}' is outside the upload prefix")]
    InvalidKey(String),

    #[error("Object not found: s3://{bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Access denied: s3://{bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("Failed to fetch object: {0}")]
    FetchFailed(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt image: {0}")]
    CorruptImage(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Failed to encode image: {0}")]
    EncodeFailed(String),

    #[error("Failed to write object: {0}")]
    WriteFailed(String),

    #[error("Failed to write metadata: {0}")]
    MetadataWriteFailed(String),

    #[error("Processing exceeded the {0}s invocation budget")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable name of the error kind, used in HTTP bodies and failure records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnrecognizedTriggerShape(_) => "UnrecognizedTriggerShape",
            Error::InvalidKey(_) => "InvalidKey",
            Error::ObjectNotFound { .. } => "ObjectNotFound",
            Error::AccessDenied { .. } => "AccessDenied",
            Error::FetchFailed(_) => "FetchFailed",
            Error::UnsupportedFormat(_) => "UnsupportedFormat",
            Error::CorruptImage(_) => "CorruptImage",
            Error::InvalidDimensions(_) => "InvalidDimensions",
            Error::EncodeFailed(_) => "EncodeFailed",
            Error::WriteFailed(_) => "WriteFailed",
            Error::MetadataWriteFailed(_) => "MetadataWriteFailed",
            Error::Timeout(_) => "Timeout",
            Error::Config(_) => "Config",
            Error::Internal(_) => "Internal",
            Error::Io(_) => "Io",
            Error::Serialization(_) => "Serialization",
        }
    }

    /// Terminal errors come from the input itself: redelivering the same
    /// trigger would fail the same way.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::UnrecognizedTriggerShape(_)
                | Error::InvalidKey(_)
                | Error::UnsupportedFormat(_)
                | Error::CorruptImage(_)
                | Error::InvalidDimensions(_)
                | Error::EncodeFailed(_)
        )
    }

    /// Errors raised while reading the source object, before any transform.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            Error::ObjectNotFound { .. } | Error::AccessDenied { .. } | Error::FetchFailed(_)
        )
    }

    /// `"<Kind>: <message>"`, the form stored in failure records.
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
