//! rawframe-session: Capture orchestration.
//!
//! Owns the video handle lifetime, serializes capture attempts behind a
//! single-flight guard, and routes each capture to PNG, log PNG, or raw
//! upload.

pub mod config;
pub mod save;
pub mod session;
pub mod transport;

pub use config::{Config, ConfigError, SourceKind};
pub use save::save_artifact;
pub use session::{CaptureError, CaptureSession, ExportKind, SessionState, SessionStatus};
pub use transport::{Transport, TransportError, UploadOutcome};
