//! Lossless PNG encoding of pixel buffers.

use crate::buffer::PixelBuffer;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("cannot encode empty {width}x{height} buffer")]
    EmptyBuffer { width: u32, height: u32 },
    #[error("PNG encoding failed: {0}")]
    Png(#[from] image::ImageError),
}

/// Encode a buffer as an RGBA8 PNG. There is no lossy mode.
pub fn encode_png(buffer: &PixelBuffer) -> Result<Vec<u8>, EncodeError> {
    if buffer.is_empty() {
        return Err(EncodeError::EmptyBuffer {
            width: buffer.width(),
            height: buffer.height(),
        });
    }

    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        buffer.as_bytes(),
        buffer.width(),
        buffer.height(),
        ExtendedColorType::Rgba8,
    )?;

    tracing::debug!(
        width = buffer.width(),
        height = buffer.height(),
        size = out.len(),
        "PNG encoded"
    );
    Ok(out)
}

/// Decode PNG bytes back to an RGBA8 buffer of whatever size they carry.
pub fn decode_png(bytes: &[u8]) -> Result<PixelBuffer, EncodeError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    Ok(PixelBuffer::from(image.into_rgba8()))
}
