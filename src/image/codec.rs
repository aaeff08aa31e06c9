//! Content-sniffing decoder and format-preserving encoder.

use super::{Format, ImageAsset};
use crate::{Error, Result};
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageError};
use std::io::Cursor;

pub const JPEG_QUALITY: u8 = 90;

/// NeuQuant sampling speed for GIF palettes (1 = slowest, 30 = fastest).
pub const GIF_QUANTIZER_SPEED: i32 = 10;

/// Identify the format from magic bytes.
pub fn detect_format(bytes: &[u8]) -> Result<Format> {
    if bytes.is_empty() {
        return Err(Error::CorruptImage("empty payload".to_string()));
    }

    let guessed = image::guess_format(bytes).map_err(|_| {
        Error::UnsupportedFormat(format!(
            "unrecognized content (first bytes: {:02X?})",
            &bytes[..bytes.len().min(8)]
        ))
    })?;

    Format::from_image_format(guessed)
        .ok_or_else(|| Error::UnsupportedFormat(format!("{:?}", guessed)))
}

pub fn decode(bytes: &[u8]) -> Result<ImageAsset> {
    let format = detect_format(bytes)?;
    let pixels =
        image::load_from_memory_with_format(bytes, format.image_format()).map_err(|e| match e {
            ImageError::Unsupported(_) => Error::UnsupportedFormat(e.to_string()),
            ImageError::Limits(_) => Error::InvalidDimensions(e.to_string()),
            other => Error::CorruptImage(other.to_string()),
        })?;

    ImageAsset::new(format, pixels)
}

/// Encode in the asset's own format.
pub fn encode(asset: &ImageAsset) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let pixels = asset.pixels();

    let result = match asset.format() {
        Format::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            to_eight_bit(pixels, false).write_with_encoder(encoder)
        }
        Format::Png => pixels.write_to(&mut buffer, image::ImageFormat::Png),
        Format::Gif => {
            let rgba = pixels.to_rgba8();
            let mut encoder = GifEncoder::new_with_speed(&mut buffer, GIF_QUANTIZER_SPEED);
            encoder.encode(
                rgba.as_raw(),
                rgba.width(),
                rgba.height(),
                ExtendedColorType::Rgba8,
            )
        }
        Format::Bmp | Format::WebP => {
            to_eight_bit(pixels, true).write_to(&mut buffer, asset.format().image_format())
        }
    };
    result.map_err(|e| Error::EncodeFailed(format!("{}: {}", asset.format().name(), e)))?;

    Ok(buffer.into_inner())
}

/// Narrow to 8-bit grey or RGB(A), which every encoder here accepts.
fn to_eight_bit(pixels: &DynamicImage, keep_alpha: bool) -> DynamicImage {
    match pixels.color() {
        ColorType::L8 | ColorType::Rgb8 => pixels.clone(),
        ColorType::La8 | ColorType::Rgba8 if keep_alpha => pixels.clone(),
        color if keep_alpha && color.has_alpha() => DynamicImage::ImageRgba8(pixels.to_rgba8()),
        _ => DynamicImage::ImageRgb8(pixels.to_rgb8()),
    }
}
