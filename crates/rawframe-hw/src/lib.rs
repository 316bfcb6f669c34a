//! rawframe-hw: Video sources and rasterization.
//!
//! Provides V4L2-based camera access, a deterministic test-pattern
//! source, and the rasterizer that scales the current frame into the
//! fixed 3840x2160 pixel buffer.

pub mod camera;
pub mod frame;
pub mod rasterizer;
pub mod source;

pub use camera::{list_devices, Camera, CameraError, DeviceInfo, PixelFormat, V4lSource};
pub use frame::Frame;
pub use rasterizer::{rasterize, RasterError};
pub use source::{
    AcquireError, Facing, StreamRequest, TestPatternHandle, TestPatternSource, VideoHandle,
    VideoSource,
};
