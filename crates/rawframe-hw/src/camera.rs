//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::{AcquireError, StreamRequest, VideoHandle, VideoSource};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied opening {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera released")]
    NotStreaming,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion-JPEG, one JPEG per buffer. Usually the only 4K option on UVC webcams.
    Mjpeg,
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Packed 24-bit RGB (3 bytes/pixel).
    Rgb24,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"RGB3" => Some(PixelFormat::Rgb24),
            _ => None,
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    /// Negotiated pixel format.
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and negotiate `request`.
    pub fn open(device_path: &str, request: &StreamRequest) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                CameraError::PermissionDenied(device_path.to_string())
            } else if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        // Query capabilities
        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for MJPG at the ideal size; accept YUYV or RGB3 if the driver substitutes.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"MJPG");
        fmt.width = request.ideal_width;
        fmt.height = request.ideal_height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need MJPG, YUYV, or RGB3)"
            ))
        })?;

        if let Err(e) = device.set_params(&Parameters::with_fps(request.ideal_frame_rate)) {
            tracing::warn!(
                fps = request.ideal_frame_rate,
                error = %e,
                "frame rate not accepted; keeping driver default"
            );
        }

        // V4L2 has no notion of facing; the device path decides.
        tracing::debug!(facing = ?request.facing, "facing mode ignored for V4L2");

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    fn open_stream(&self) -> Result<MmapStream<'_>, CameraError> {
        let device = self.device.as_ref().ok_or(CameraError::NotStreaming)?;
        MmapStream::with_buffers(device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))
    }

    /// Capture a single frame, converting to RGBA8.
    ///
    /// Each call streams on a fresh mmap stream. Some UVC drivers restart
    /// auto-exposure when streaming restarts, so a frame taken long after
    /// `warm_up` may not be fully settled.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream = self.open_stream()?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let (width, height, data) = self.buf_to_rgba(&buf[..used])?;

        Ok(Frame {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
        })
    }

    /// Convert a raw buffer to RGBA8 based on the negotiated format.
    fn buf_to_rgba(&self, buf: &[u8]) -> Result<(u32, u32, Vec<u8>), CameraError> {
        let converted = match self.pixel_format {
            PixelFormat::Mjpeg => frame::mjpeg_to_rgba(buf),
            PixelFormat::Yuyv => frame::yuyv_to_rgba(buf, self.width, self.height)
                .map(|data| (self.width, self.height, data)),
            PixelFormat::Rgb24 => frame::rgb24_to_rgba(buf, self.width, self.height)
                .map(|data| (self.width, self.height, data)),
        };
        converted.map_err(|e| {
            CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format))
        })
    }

    /// Discard frames while auto-exposure and white balance settle.
    pub fn warm_up(&self, frames: usize) {
        if frames == 0 {
            return;
        }
        tracing::info!(count = frames, "discarding warmup frames");
        let mut stream = match self.open_stream() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "warmup skipped");
                return;
            }
        };
        discard_frames(frames, || {
            stream
                .next()
                .map(|(_, meta)| meta.sequence)
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))
        });
    }
}

/// Pull up to `count` frames from one stream, stopping at the first failure.
/// Returns how many were discarded.
fn discard_frames(
    count: usize,
    mut next: impl FnMut() -> Result<u32, CameraError>,
) -> usize {
    for discarded in 0..count {
        if let Err(e) = next() {
            tracing::warn!(discarded, error = %e, "warmup frame failed");
            return discarded;
        }
    }
    count
}

impl VideoHandle for Camera {
    fn dimensions(&self) -> (u32, u32) {
        if self.device.is_some() {
            (self.width, self.height)
        } else {
            (0, 0)
        }
    }

    fn current_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn release(&mut self) {
        if self.device.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    fn is_active(&self) -> bool {
        self.device.is_some()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}

/// [`VideoSource`] backed by a V4L2 device node.
#[derive(Debug, Clone)]
pub struct V4lSource {
    device_path: String,
    warmup_frames: usize,
}

impl V4lSource {
    pub fn new(device_path: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames,
        }
    }
}

impl VideoSource for V4lSource {
    fn acquire(&self, request: &StreamRequest) -> Result<Box<dyn VideoHandle>, AcquireError> {
        let camera = Camera::open(&self.device_path, request)?;
        camera.warm_up(self.warmup_frames);
        Ok(Box::new(camera))
    }

    fn describe(&self) -> String {
        format!("v4l2 {}", self.device_path)
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}
