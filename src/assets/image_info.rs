//! Image dimensions straight from the encoded bytes. Decoders stop after the header; pixel data
//! is decoded later, on the render side.

use std::io::Cursor;

use image::{ImageFormat, ImageReader, ImageResult};

/// Format for a file extension, if this build can decode it.
pub fn format_for_extension(ext: &str) -> Option<ImageFormat> {
    ImageFormat::from_extension(ext).filter(|format| format.reading_enabled())
}

pub fn dimensions(format: ImageFormat, bytes: &[u8]) -> ImageResult<(u32, u32)> {
    ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()
}
