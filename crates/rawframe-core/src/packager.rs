//! Raw payload packing: metadata plus the unmodified RGBA8 bytes.

use crate::buffer::PixelBuffer;
use serde::{Deserialize, Serialize};

/// Pixel layout tag carried in every raw payload.
pub const RAW_FORMAT: &str = "RGBA8";
/// Multipart field holding the metadata JSON document.
pub const META_FIELD: &str = "meta";
/// Multipart field holding the raw byte stream.
pub const RAW_FIELD: &str = "raw";

/// Metadata describing a raw pixel dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
    /// Capture time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Metadata plus a borrowed view of the buffer bytes.
///
/// The bytes are referenced as-is: no compression, no channel reordering.
#[derive(Debug, Clone)]
pub struct RawPayload<'a> {
    pub metadata: RawMetadata,
    pub raw: &'a [u8],
}

impl RawMetadata {
    /// Describe `buffer` as captured at `timestamp`.
    pub fn for_buffer(buffer: &PixelBuffer, timestamp: i64) -> Self {
        Self {
            width: buffer.width(),
            height: buffer.height(),
            format: RAW_FORMAT.to_string(),
            timestamp,
        }
    }

    /// `capture_<timestamp>.rgba`
    pub fn file_name(&self) -> String {
        format!("capture_{}.rgba", self.timestamp)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl RawPayload<'_> {
    pub fn file_name(&self) -> String {
        self.metadata.file_name()
    }
}

/// Describe `buffer` and borrow its bytes for transmission.
pub fn pack(buffer: &PixelBuffer, timestamp: i64) -> RawPayload<'_> {
    RawPayload {
        metadata: RawMetadata::for_buffer(buffer, timestamp),
        raw: buffer.as_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_matches_buffer() {
        let buf = PixelBuffer::new(16, 9);
        let payload = pack(&buf, 1_700_000_000_123);
        assert_eq!(payload.metadata.width, 16);
        assert_eq!(payload.metadata.height, 9);
        assert_eq!(payload.metadata.format, "RGBA8");
        assert_eq!(payload.raw.len(), 16 * 9 * 4);
    }

    #[test]
    fn test_raw_bytes_unmodified() {
        let data: Vec<u8> = (0..24).collect();
        let buf = PixelBuffer::from_raw(3, 2, data.clone()).unwrap();
        assert_eq!(pack(&buf, 0).raw, &data[..]);
    }

    #[test]
    fn test_metadata_json_shape() {
        let buf = PixelBuffer::new(3840, 2160);
        let meta = RawMetadata::for_buffer(&buf, 42);
        let value: serde_json::Value = serde_json::from_str(&meta.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "width": 3840,
                "height": 2160,
                "format": "RGBA8",
                "timestamp": 42,
            })
        );
    }

    #[test]
    fn test_file_name() {
        let buf = PixelBuffer::new(1, 1);
        assert_eq!(pack(&buf, 1234).file_name(), "capture_1234.rgba");
    }
}
