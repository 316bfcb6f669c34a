//! Draws the current source frame into the fixed-size pixel buffer.
//!
//! The frame is stretched to exactly 3840x2160; aspect ratio is not
//! preserved and there is no letterboxing.

use crate::camera::CameraError;
use crate::frame::Frame;
use crate::source::VideoHandle;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use rawframe_core::{PixelBuffer, TARGET_HEIGHT, TARGET_WIDTH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),
}

impl From<CameraError> for RasterError {
    fn from(err: CameraError) -> Self {
        RasterError::SourceUnavailable(err.to_string())
    }
}

/// Grab the handle's current frame and scale it to the capture resolution.
///
/// Blocking: run it off the async executor. The returned buffer is fully
/// written when this returns, which is the draw-complete signal.
pub fn rasterize(handle: &mut dyn VideoHandle) -> Result<PixelBuffer, RasterError> {
    if !handle.is_active() {
        return Err(RasterError::SourceUnavailable("video handle released".into()));
    }
    let (width, height) = handle.dimensions();
    if width == 0 || height == 0 {
        return Err(RasterError::SourceUnavailable(format!(
            "no active frame ({width}x{height})"
        )));
    }

    let frame = handle.current_frame()?;
    scale_to_target(frame)
}

/// Stretch `frame` to exactly [`TARGET_WIDTH`]x[`TARGET_HEIGHT`].
pub fn scale_to_target(frame: Frame) -> Result<PixelBuffer, RasterError> {
    if frame.is_empty() {
        return Err(RasterError::SourceUnavailable(format!(
            "empty frame ({}x{})",
            frame.width, frame.height
        )));
    }

    let (src_w, src_h, seq) = (frame.width, frame.height, frame.sequence);
    let source = RgbaImage::from_raw(src_w, src_h, frame.data).ok_or_else(|| {
        RasterError::SourceUnavailable(format!("frame data does not match {src_w}x{src_h}"))
    })?;

    let scaled = if (src_w, src_h) == (TARGET_WIDTH, TARGET_HEIGHT) {
        source
    } else {
        imageops::resize(&source, TARGET_WIDTH, TARGET_HEIGHT, FilterType::Triangle)
    };

    tracing::debug!(
        src_width = src_w,
        src_height = src_h,
        seq,
        "frame rasterized to {TARGET_WIDTH}x{TARGET_HEIGHT}"
    );
    Ok(PixelBuffer::from(scaled))
}
