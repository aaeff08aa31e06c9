//! Aspect-preserving resize to a fixed target width.

use super::ImageAsset;
use crate::{Error, Result};
use image::imageops::FilterType;

/// Images already at or below the target width pass through untouched
/// instead of being upscaled.
pub const UPSCALE_SMALLER_IMAGES: bool = false;

/// Lanczos3 is a deterministic windowed-sinc filter; no dithering is involved.
pub const RESAMPLING_FILTER: FilterType = FilterType::Lanczos3;

/// Output dimensions for a `width x height` image, `None` when the image is
/// left as it is.
///
/// The height is `round(height * target_width / width)`, computed in integer
/// arithmetic with halves rounding up, and never less than one pixel.
pub fn target_dimensions(
    width: u32,
    height: u32,
    target_width: u32,
    upscale: bool,
) -> Result<Option<(u32, u32)>> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions(format!(
            "source is {}x{}",
            width, height
        )));
    }
    if target_width == 0 {
        return Err(Error::InvalidDimensions("target width is 0".to_string()));
    }
    if width == target_width || (width < target_width && !upscale) {
        return Ok(None);
    }

    let (w, h, t) = (u64::from(width), u64::from(height), u64::from(target_width));
    let scaled = (2 * h * t + w) / (2 * w);
    let target_height = u32::try_from(scaled.max(1)).map_err(|_| {
        Error::InvalidDimensions(format!(
            "{}x{} scaled to width {} overflows",
            width, height, target_width
        ))
    })?;

    Ok(Some((target_width, target_height)))
}

/// Resize under the crate-wide upscale policy.
pub fn resize(asset: ImageAsset, target_width: u32) -> Result<ImageAsset> {
    resize_with_policy(asset, target_width, UPSCALE_SMALLER_IMAGES)
}

pub fn resize_with_policy(asset: ImageAsset, target_width: u32, upscale: bool) -> Result<ImageAsset> {
    match target_dimensions(asset.width(), asset.height(), target_width, upscale)? {
        Some((width, height)) => {
            let resized = asset.pixels().resize_exact(width, height, RESAMPLING_FILTER);
            ImageAsset::new(asset.format(), resized)
        }
        None => Ok(asset),
    }
}
