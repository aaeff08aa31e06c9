//! Image resize handler - turns uploaded images into fixed-width copies
//!
//! One Lambda function serves two triggers: S3 object-created notifications
//! for files landing under the upload prefix, and API Gateway requests that
//! carry the image in their body. Both are normalized into the same request,
//! resized to the configured width in their original format, written under
//! the resized prefix, and recorded in DynamoDB.

pub mod app;
pub mod error;
pub mod event;
pub mod image;
pub mod metadata;
pub mod models;
pub mod response;
pub mod storage;

pub use error::{Error, Result};
