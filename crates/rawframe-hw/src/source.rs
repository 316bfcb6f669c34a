//! Video source acquisition contract and a deterministic test-pattern source.

use crate::camera::CameraError;
use crate::frame::Frame;
use rawframe_core::{TARGET_HEIGHT, TARGET_WIDTH};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl From<CameraError> for AcquireError {
    fn from(err: CameraError) -> Self {
        match err {
            CameraError::PermissionDenied(path) => AcquireError::PermissionDenied(path),
            other => AcquireError::DeviceUnavailable(other.to_string()),
        }
    }
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

/// Resolution / frame-rate / facing request passed to [`VideoSource::acquire`].
///
/// All values are ideals: the device may negotiate something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub ideal_frame_rate: u32,
    pub facing: Facing,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            ideal_width: TARGET_WIDTH,
            ideal_height: TARGET_HEIGHT,
            ideal_frame_rate: 30,
            facing: Facing::Environment,
        }
    }
}

/// An acquired, live video stream.
///
/// Implementations must release the underlying device in `release()` and
/// also on drop, so a handle lost on any exit path still frees the hardware.
pub trait VideoHandle: Send {
    /// Negotiated frame size. `(0, 0)` once released.
    fn dimensions(&self) -> (u32, u32);

    /// Grab the most recent frame.
    fn current_frame(&mut self) -> Result<Frame, CameraError>;

    /// Release the device. Idempotent.
    fn release(&mut self);

    fn is_active(&self) -> bool;
}

/// Something that can hand out live video handles.
pub trait VideoSource: Send + Sync {
    fn acquire(&self, request: &StreamRequest) -> Result<Box<dyn VideoHandle>, AcquireError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Synthetic source producing a fixed-size gradient.
///
/// Red ramps left to right, green top to bottom, blue follows the frame
/// sequence, alpha is opaque. A 0x0 size yields a handle that never has
/// an active frame.
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    acquire_error: Option<AcquireError>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            acquire_error: None,
        }
    }

    /// Source whose every acquisition fails with `err`.
    pub fn failing(err: AcquireError) -> Self {
        Self {
            width: 0,
            height: 0,
            acquire_error: Some(err),
        }
    }
}

impl VideoSource for TestPatternSource {
    fn acquire(&self, request: &StreamRequest) -> Result<Box<dyn VideoHandle>, AcquireError> {
        if let Some(err) = &self.acquire_error {
            return Err(err.clone());
        }
        tracing::info!(
            requested_width = request.ideal_width,
            requested_height = request.ideal_height,
            width = self.width,
            height = self.height,
            "test pattern acquired"
        );
        Ok(Box::new(TestPatternHandle {
            width: self.width,
            height: self.height,
            sequence: 0,
            active: true,
        }))
    }

    fn describe(&self) -> String {
        format!("test-pattern {}x{}", self.width, self.height)
    }
}

/// Handle returned by [`TestPatternSource`].
#[derive(Debug)]
pub struct TestPatternHandle {
    width: u32,
    height: u32,
    sequence: u32,
    active: bool,
}

impl TestPatternHandle {
    /// Render the gradient for a given sequence number.
    pub fn render(width: u32, height: u32, sequence: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        let blue = (sequence.wrapping_mul(17) % 256) as u8;
        for y in 0..height {
            let g = ramp(y, height);
            for x in 0..width {
                data.extend_from_slice(&[ramp(x, width), g, blue, 255]);
            }
        }
        data
    }
}

fn ramp(pos: u32, len: u32) -> u8 {
    if len <= 1 {
        return 0;
    }
    (pos as u64 * 255 / (len as u64 - 1)) as u8
}

impl VideoHandle for TestPatternHandle {
    fn dimensions(&self) -> (u32, u32) {
        if self.active {
            (self.width, self.height)
        } else {
            (0, 0)
        }
    }

    fn current_frame(&mut self) -> Result<Frame, CameraError> {
        if !self.active {
            return Err(CameraError::NotStreaming);
        }
        let frame = Frame {
            data: Self::render(self.width, self.height, self.sequence),
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }

    fn release(&mut self) {
        if self.active {
            tracing::debug!("test pattern released");
            self.active = false;
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for TestPatternHandle {
    fn drop(&mut self) {
        self.release();
    }
}
