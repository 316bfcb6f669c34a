use rawframe_hw::{TestPatternSource, V4lSource, VideoSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("unknown video source '{0}' (expected v4l2 or test-pattern)")]
    UnknownSource(String),
}

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    V4l2,
    TestPattern,
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v4l2" => Ok(SourceKind::V4l2),
            "test-pattern" => Ok(SourceKind::TestPattern),
            other => Err(ConfigError::UnknownSource(other.to_string())),
        }
    }
}

/// Capture configuration: TOML file (optional), then `RAWFRAME_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Frame provider.
    pub source: SourceKind,
    /// Native size of the test-pattern source.
    pub test_pattern_width: u32,
    pub test_pattern_height: u32,
    /// Raw upload endpoint; the host is deployment-specific.
    pub upload_url: String,
    /// Whole-request timeout for raw uploads.
    pub upload_timeout_secs: u64,
    /// Directory exported artifacts are written to.
    pub output_dir: PathBuf,
    /// Number of warmup frames to discard after opening the camera (AE/AWB settling).
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            source: SourceKind::V4l2,
            test_pattern_width: 1920,
            test_pattern_height: 1080,
            upload_url: "http://127.0.0.1:8000/upload-raw".to_string(),
            upload_timeout_secs: 120,
            output_dir: PathBuf::from("."),
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load configuration from `RAWFRAME_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Load a TOML file, then let environment variables override it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.with_env())
    }

    fn with_env(self) -> Self {
        Self {
            camera_device: std::env::var("RAWFRAME_CAMERA_DEVICE").unwrap_or(self.camera_device),
            source: match std::env::var("RAWFRAME_SOURCE") {
                Ok(v) => v.parse().unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "ignoring RAWFRAME_SOURCE");
                    self.source
                }),
                Err(_) => self.source,
            },
            test_pattern_width: self.test_pattern_width,
            test_pattern_height: self.test_pattern_height,
            upload_url: std::env::var("RAWFRAME_UPLOAD_URL").unwrap_or(self.upload_url),
            upload_timeout_secs: env_parse("RAWFRAME_UPLOAD_TIMEOUT_SECS", self.upload_timeout_secs),
            output_dir: std::env::var("RAWFRAME_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(self.output_dir),
            warmup_frames: env_parse("RAWFRAME_WARMUP_FRAMES", self.warmup_frames),
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// Build the configured video source.
    pub fn video_source(&self) -> Arc<dyn VideoSource> {
        match self.source {
            SourceKind::V4l2 => Arc::new(V4lSource::new(&self.camera_device, self.warmup_frames)),
            SourceKind::TestPattern => Arc::new(TestPatternSource::new(
                self.test_pattern_width,
                self.test_pattern_height,
            )),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
