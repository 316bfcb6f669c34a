//! rawframe-core: Capture export pipeline.
//!
//! Holds the fixed-size RGBA8 pixel buffer and the pure transforms applied
//! to it: the log tone curve, lossless PNG encoding and raw payload packing.

pub mod artifact;
pub mod buffer;
pub mod encoder;
pub mod packager;
pub mod tone_curve;

pub use artifact::{ExportArtifact, ImageKind};
pub use buffer::{BufferError, PixelBuffer, CHANNELS, TARGET_HEIGHT, TARGET_WIDTH};
pub use encoder::{decode_png, encode_png, EncodeError};
pub use packager::{pack, RawMetadata, RawPayload};
