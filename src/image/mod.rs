//! Image decoding, resizing and re-encoding
//!
//! Everything here is synchronous CPU work. Formats are detected from the
//! bytes themselves; key extensions are never trusted.

pub mod codec;
pub mod processor;
pub mod resize;

pub use processor::{ImageProcessor, TransformOutput};

use crate::{Error, Result};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

/// Raster formats the handler accepts. Output always keeps the input format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Bmp,
    WebP,
}

impl Format {
    pub const ALL: [Format; 5] = [
        Format::Jpeg,
        Format::Png,
        Format::Gif,
        Format::Bmp,
        Format::WebP,
    ];

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(Format::Jpeg),
            ImageFormat::Png => Some(Format::Png),
            ImageFormat::Gif => Some(Format::Gif),
            ImageFormat::Bmp => Some(Format::Bmp),
            ImageFormat::WebP => Some(Format::WebP),
            _ => None,
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            Format::Jpeg => ImageFormat::Jpeg,
            Format::Png => ImageFormat::Png,
            Format::Gif => ImageFormat::Gif,
            Format::Bmp => ImageFormat::Bmp,
            Format::WebP => ImageFormat::WebP,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Format::Jpeg => "JPEG",
            Format::Png => "PNG",
            Format::Gif => "GIF",
            Format::Bmp => "BMP",
            Format::WebP => "WEBP",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Jpeg => "image/jpeg",
            Format::Png => "image/png",
            Format::Gif => "image/gif",
            Format::Bmp => "image/bmp",
            Format::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Format::Jpeg => "jpg",
            Format::Png => "png",
            Format::Gif => "gif",
            Format::Bmp => "bmp",
            Format::WebP => "webp",
        }
    }
}

/// A decoded image together with the format it was decoded from.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    format: Format,
    pixels: DynamicImage,
}

impl ImageAsset {
    pub fn new(format: Format, pixels: DynamicImage) -> Result<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(Error::InvalidDimensions(format!(
                "{}x{} image",
                pixels.width(),
                pixels.height()
            )));
        }
        Ok(Self { format, pixels })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }
}
