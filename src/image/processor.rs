use super::{codec, resize, Format};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// Dimensions and encoded bytes produced by one transform.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub format: Format,
    pub original_width: u32,
    pub original_height: u32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub data: Vec<u8>,
}

/// Decode, resize and re-encode in the original format.
#[derive(Debug, Clone, Copy)]
pub struct ImageProcessor {
    target_width: u32,
}

impl ImageProcessor {
    pub fn new(target_width: u32) -> Self {
        Self { target_width }
    }

    /// Runs [`transform`](Self::transform) on the blocking pool so the
    /// caller's timers keep firing while the image is decoded and encoded.
    pub async fn transform_blocking(&self, image_data: Arc<Vec<u8>>) -> Result<TransformOutput> {
        let processor = *self;
        tokio::task::spawn_blocking(move || processor.transform(&image_data))
            .await
            .map_err(|e| Error::Internal(format!("Image processing task join error: {}", e)))?
    }

    pub fn transform(&self, image_data: &[u8]) -> Result<TransformOutput> {
        let asset = codec::decode(image_data)?;
        let (original_width, original_height) = (asset.width(), asset.height());

        let resized = resize::resize(asset, self.target_width)?;
        let data = codec::encode(&resized)?;

        debug!(
            format = resized.format().name(),
            original = %format!("{}x{}", original_width, original_height),
            resized = %format!("{}x{}", resized.width(), resized.height()),
            size_bytes = data.len(),
            "Transformed image"
        );

        Ok(TransformOutput {
            format: resized.format(),
            original_width,
            original_height,
            resized_width: resized.width(),
            resized_height: resized.height(),
            data,
        })
    }
}
