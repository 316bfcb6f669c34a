//! Export artifacts handed to the save mechanism.

use crate::packager::RawMetadata;

/// Which transform preceded PNG encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Untransformed, lossless.
    Lossless,
    /// Log tone curve applied before encoding.
    ToneCurve,
}

impl ImageKind {
    fn file_prefix(&self) -> &'static str {
        match self {
            ImageKind::Lossless => "capture",
            ImageKind::ToneCurve => "capture_log",
        }
    }
}

/// Result of one successful export.
#[derive(Clone)]
pub enum ExportArtifact {
    EncodedImage {
        kind: ImageKind,
        timestamp: i64,
        bytes: Vec<u8>,
    },
    RawPayload {
        metadata: RawMetadata,
        bytes: Vec<u8>,
    },
}

impl ExportArtifact {
    /// `capture_<ts>.png`, `capture_log_<ts>.png` or `capture_<ts>.rgba`.
    pub fn file_name(&self) -> String {
        match self {
            ExportArtifact::EncodedImage {
                kind, timestamp, ..
            } => format!("{}_{}.png", kind.file_prefix(), timestamp),
            ExportArtifact::RawPayload { metadata, .. } => metadata.file_name(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            ExportArtifact::EncodedImage { bytes, .. } | ExportArtifact::RawPayload { bytes, .. } => {
                bytes
            }
        }
    }
}

impl std::fmt::Debug for ExportArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportArtifact::EncodedImage {
                kind,
                timestamp,
                bytes,
            } => f
                .debug_struct("EncodedImage")
                .field("kind", kind)
                .field("timestamp", timestamp)
                .field("len", &bytes.len())
                .finish(),
            ExportArtifact::RawPayload { metadata, bytes } => f
                .debug_struct("RawPayload")
                .field("metadata", metadata)
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        let png = ExportArtifact::EncodedImage {
            kind: ImageKind::Lossless,
            timestamp: 7,
            bytes: vec![],
        };
        let log = ExportArtifact::EncodedImage {
            kind: ImageKind::ToneCurve,
            timestamp: 7,
            bytes: vec![],
        };
        let raw = ExportArtifact::RawPayload {
            metadata: RawMetadata {
                width: 1,
                height: 1,
                format: "RGBA8".into(),
                timestamp: 7,
            },
            bytes: vec![0; 4],
        };
        assert_eq!(png.file_name(), "capture_7.png");
        assert_eq!(log.file_name(), "capture_log_7.png");
        assert_eq!(raw.file_name(), "capture_7.rgba");
        assert_eq!(raw.bytes().len(), 4);
    }
}
