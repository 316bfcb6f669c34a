//! Capture session: owns the video handle and serializes exports.
//!
//! Every export runs acquire-frame → rasterize → (encode | tone curve →
//! encode | pack → upload) as a chain of awaited tasks. CPU-bound stages
//! run on the blocking pool; the session itself never runs two exports
//! at once. A second request while one is in flight is rejected with
//! [`CaptureError::Busy`], not queued.

use crate::transport::{Transport, TransportError};
use rawframe_core::{encode_png, pack, tone_curve, EncodeError, ExportArtifact, ImageKind};
use rawframe_hw::{rasterize, AcquireError, RasterError, StreamRequest, VideoHandle, VideoSource};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("encoding failed: {0}")]
    EncodeFailure(String),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("upload failed with HTTP status {0}")]
    UploadFailed(u16),
    #[error("upload rejected: {0}")]
    UploadRejected(String),
    #[error("capture already in progress")]
    Busy,
}

impl From<AcquireError> for CaptureError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::PermissionDenied(msg) => CaptureError::PermissionDenied(msg),
            AcquireError::DeviceUnavailable(msg) => CaptureError::DeviceUnavailable(msg),
        }
    }
}

impl From<RasterError> for CaptureError {
    fn from(err: RasterError) -> Self {
        match err {
            RasterError::SourceUnavailable(msg) => CaptureError::SourceUnavailable(msg),
        }
    }
}

impl From<EncodeError> for CaptureError {
    fn from(err: EncodeError) -> Self {
        CaptureError::EncodeFailure(err.to_string())
    }
}

impl From<TransportError> for CaptureError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::UploadFailed(status) => CaptureError::UploadFailed(status),
            TransportError::Rejected(msg) => CaptureError::UploadRejected(msg),
            other => CaptureError::TransportError(other.to_string()),
        }
    }
}

/// The three export paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Lossless PNG of the untransformed buffer.
    Png,
    /// PNG after the log tone curve.
    LogPng,
    /// Metadata + raw RGBA8 bytes uploaded to the processing endpoint.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Capturing,
}

/// Snapshot of a session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Whether a video handle is currently held.
    pub active: bool,
    /// Outcome of the last start/stop/export.
    pub message: String,
}

type SharedHandle = Arc<Mutex<Box<dyn VideoHandle>>>;

/// Clears the in-flight flag on every exit path, including panics and
/// dropped futures.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One camera, one export at a time.
pub struct CaptureSession {
    source: Arc<dyn VideoSource>,
    request: StreamRequest,
    transport: Transport,
    handle: Mutex<Option<SharedHandle>>,
    capturing: AtomicBool,
    status: Mutex<String>,
}

impl CaptureSession {
    pub fn new(source: Arc<dyn VideoSource>, request: StreamRequest, transport: Transport) -> Self {
        Self {
            source,
            request,
            transport,
            handle: Mutex::new(None),
            capturing: AtomicBool::new(false),
            status: Mutex::new("idle".to_string()),
        }
    }

    /// Acquire the video source. No-op if a handle is already held.
    ///
    /// On failure the session stays without a handle until a later
    /// `start()` succeeds.
    pub async fn start(&self) -> Result<(), CaptureError> {
        if self.is_active() {
            tracing::debug!("session already started");
            return Ok(());
        }

        let source = self.source.clone();
        let request = self.request;
        tracing::info!(source = %source.describe(), ?request, "acquiring video source");

        let acquired = tokio::task::spawn_blocking(move || source.acquire(&request))
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(format!("acquire task failed: {e}")))
            .and_then(|r| r.map_err(CaptureError::from));

        match acquired {
            Ok(handle) => {
                let (width, height) = handle.dimensions();
                tracing::info!(width, height, "session started");
                *self.handle_slot() = Some(Arc::new(Mutex::new(handle)));
                self.set_status(format!("streaming {width}x{height}"));
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to acquire video source");
                self.set_status(e.to_string());
                Err(e)
            }
        }
    }

    /// Release the video handle. Safe to call in any state.
    ///
    /// If an export currently holds the handle, it is released as soon as
    /// that export finishes with it.
    pub fn stop(&self) {
        if let Some(shared) = self.handle_slot().take() {
            match shared.try_lock() {
                Ok(mut handle) => handle.release(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().release(),
                Err(TryLockError::WouldBlock) => {
                    tracing::debug!("handle in use by export; releasing on completion")
                }
            }
            tracing::info!("session stopped");
        }
        self.set_status("stopped");
    }

    pub fn is_active(&self) -> bool {
        self.handle_slot().is_some()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: if self.capturing.load(Ordering::Acquire) {
                SessionState::Capturing
            } else {
                SessionState::Idle
            },
            active: self.is_active(),
            message: self
                .status
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    pub async fn export_png(&self) -> Result<ExportArtifact, CaptureError> {
        self.export(ExportKind::Png).await
    }

    pub async fn export_log_png(&self) -> Result<ExportArtifact, CaptureError> {
        self.export(ExportKind::LogPng).await
    }

    pub async fn export_raw(&self) -> Result<ExportArtifact, CaptureError> {
        self.export(ExportKind::Raw).await
    }

    /// Run one export. The outcome, success or failure, is recorded as the
    /// session status; failures never invalidate the handle.
    pub async fn export(&self, kind: ExportKind) -> Result<ExportArtifact, CaptureError> {
        let Some(_flight) = FlightGuard::try_acquire(&self.capturing) else {
            tracing::debug!(?kind, "export already in progress; request ignored");
            return Err(CaptureError::Busy);
        };
        self.set_status("capturing");

        match self.run_pipeline(kind).await {
            Ok((artifact, message)) => {
                tracing::info!(
                    ?kind,
                    file = %artifact.file_name(),
                    bytes = artifact.bytes().len(),
                    "export complete"
                );
                self.set_status(message);
                Ok(artifact)
            }
            Err(e) => {
                tracing::warn!(?kind, error = %e, "export failed");
                self.set_status(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, kind: ExportKind) -> Result<(ExportArtifact, String), CaptureError> {
        let handle = self
            .handle_slot()
            .clone()
            .ok_or_else(|| CaptureError::SourceUnavailable("session not started".into()))?;

        let buffer = tokio::task::spawn_blocking(move || {
            let mut handle = handle.lock().unwrap_or_else(PoisonError::into_inner);
            rasterize(&mut **handle)
        })
        .await
        .map_err(|e| CaptureError::SourceUnavailable(format!("rasterizer task failed: {e}")))??;

        let timestamp = chrono::Utc::now().timestamp_millis();

        match kind {
            ExportKind::Png | ExportKind::LogPng => {
                let image_kind = if kind == ExportKind::LogPng {
                    ImageKind::ToneCurve
                } else {
                    ImageKind::Lossless
                };
                let bytes = tokio::task::spawn_blocking(move || {
                    let mut buffer = buffer;
                    if image_kind == ImageKind::ToneCurve {
                        tone_curve::apply(&mut buffer);
                    }
                    encode_png(&buffer)
                })
                .await
                .map_err(|e| CaptureError::EncodeFailure(format!("encoder task failed: {e}")))??;

                let artifact = ExportArtifact::EncodedImage {
                    kind: image_kind,
                    timestamp,
                    bytes,
                };
                let message = format!(
                    "{} ready ({} bytes)",
                    artifact.file_name(),
                    artifact.bytes().len()
                );
                Ok((artifact, message))
            }
            ExportKind::Raw => {
                let payload = pack(&buffer, timestamp);
                let outcome = self.transport.send(&payload).await?;
                let metadata = payload.metadata;
                let artifact = ExportArtifact::RawPayload {
                    metadata,
                    bytes: buffer.into_raw(),
                };
                Ok((artifact, outcome.message))
            }
        }
    }

    fn handle_slot(&self) -> MutexGuard<'_, Option<SharedHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, message: impl Into<String>) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = message.into();
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{DefaultBodyLimit, Multipart};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use rawframe_core::{decode_png, PixelBuffer, TARGET_HEIGHT, TARGET_WIDTH};
    use rawframe_hw::rasterizer::scale_to_target;
    use rawframe_hw::{CameraError, Frame, TestPatternHandle, TestPatternSource};
    use std::net::SocketAddr;
    use std::time::Duration;

    const SRC_W: u32 = 64;
    const SRC_H: u32 = 36;

    /// Test-pattern source whose handles report release through a shared flag.
    struct TrackedSource {
        inner: TestPatternSource,
        released: Arc<AtomicBool>,
        gate: Mutex<Option<FrameGate>>,
    }

    /// Parks the first `current_frame` call until the test lets it proceed.
    struct FrameGate {
        entered: tokio::sync::oneshot::Sender<()>,
        proceed: std::sync::mpsc::Receiver<()>,
    }

    impl TrackedSource {
        fn new(released: Arc<AtomicBool>) -> Self {
            Self {
                inner: TestPatternSource::new(SRC_W, SRC_H),
                released,
                gate: Mutex::new(None),
            }
        }

        fn gated(released: Arc<AtomicBool>, gate: FrameGate) -> Self {
            Self {
                gate: Mutex::new(Some(gate)),
                ..Self::new(released)
            }
        }
    }

    struct TrackedHandle {
        inner: Box<dyn VideoHandle>,
        released: Arc<AtomicBool>,
        gate: Option<FrameGate>,
    }

    impl VideoSource for TrackedSource {
        fn acquire(&self, request: &StreamRequest) -> Result<Box<dyn VideoHandle>, AcquireError> {
            Ok(Box::new(TrackedHandle {
                inner: self.inner.acquire(request)?,
                released: self.released.clone(),
                gate: self.gate.lock().unwrap().take(),
            }))
        }

        fn describe(&self) -> String {
            "tracked".into()
        }
    }

    impl VideoHandle for TrackedHandle {
        fn dimensions(&self) -> (u32, u32) {
            self.inner.dimensions()
        }

        fn current_frame(&mut self) -> Result<Frame, CameraError> {
            if let Some(gate) = self.gate.take() {
                gate.entered.send(()).unwrap();
                gate.proceed.recv().unwrap();
            }
            self.inner.current_frame()
        }

        fn release(&mut self) {
            self.inner.release();
            self.released.store(true, Ordering::SeqCst);
        }

        fn is_active(&self) -> bool {
            self.inner.is_active()
        }
    }

    impl Drop for TrackedHandle {
        fn drop(&mut self) {
            self.release();
        }
    }

    fn transport_to(endpoint: &str) -> Transport {
        Transport::new(endpoint, Duration::from_secs(30)).unwrap()
    }

    fn session_with(source: Arc<dyn VideoSource>) -> CaptureSession {
        CaptureSession::new(
            source,
            StreamRequest::default(),
            transport_to("http://127.0.0.1:9/upload-raw"),
        )
    }

    fn pattern_session() -> CaptureSession {
        session_with(Arc::new(TestPatternSource::new(SRC_W, SRC_H)))
    }

    /// What the session should rasterize for the first frame of a fresh handle.
    fn expected_first_buffer() -> PixelBuffer {
        scale_to_target(Frame {
            data: TestPatternHandle::render(SRC_W, SRC_H, 0),
            width: SRC_W,
            height: SRC_H,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        })
        .unwrap()
    }

    async fn start_upload_stub(status: StatusCode, reply: serde_json::Value) -> SocketAddr {
        let app = Router::new()
            .route(
                "/upload-raw",
                post(move |mut multipart: Multipart| {
                    let reply = reply.clone();
                    async move {
                        let mut meta = serde_json::Value::Null;
                        let mut raw_len = 0usize;
                        while let Some(field) = multipart.next_field().await.unwrap() {
                            let name = field.name().unwrap_or_default().to_string();
                            let bytes = field.bytes().await.unwrap();
                            match name.as_str() {
                                "meta" => meta = serde_json::from_slice(&bytes).unwrap(),
                                "raw" => raw_len = bytes.len(),
                                _ => {}
                            }
                        }
                        // Echo what arrived so the test can check it end to end.
                        let expected = meta["width"].as_u64().unwrap_or(0)
                            * meta["height"].as_u64().unwrap_or(0)
                            * 4;
                        let mut reply = reply;
                        if reply["message"].is_null() {
                            reply["message"] =
                                serde_json::json!(format!("got {raw_len} of {expected} bytes"));
                        }
                        (status, Json(reply))
                    }
                }),
            )
            .layer(DefaultBodyLimit::disable());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let session = pattern_session();
        assert!(!session.is_active());
        session.start().await.unwrap();
        assert!(session.is_active());
        assert_eq!(session.status().message, "streaming 64x36");
        // second start is a no-op
        session.start().await.unwrap();
        session.stop();
        assert!(!session.is_active());
        assert_eq!(session.status().message, "stopped");
        assert_eq!(session.status().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_export_without_start_is_source_unavailable() {
        let session = pattern_session();
        let err = session.export_png().await.unwrap_err();
        assert!(matches!(err, CaptureError::SourceUnavailable(_)));
        let status = session.status();
        assert_eq!(status.state, SessionState::Idle);
        assert!(status.message.contains("unavailable"));

        // still usable afterwards
        session.start().await.unwrap();
        assert!(session.export_png().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_sized_frame_is_source_unavailable() {
        let session = session_with(Arc::new(TestPatternSource::new(0, 0)));
        session.start().await.unwrap();
        let err = session.export_log_png().await.unwrap_err();
        assert!(matches!(err, CaptureError::SourceUnavailable(_)));
        assert!(session.is_active());
        assert_eq!(session.status().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_acquire_failures() {
        let denied = session_with(Arc::new(TestPatternSource::failing(
            AcquireError::PermissionDenied("/dev/video0".into()),
        )));
        let err = denied.start().await.unwrap_err();
        assert_eq!(err, CaptureError::PermissionDenied("/dev/video0".into()));
        assert!(!denied.is_active());
        assert!(denied.status().message.contains("permission denied"));

        let missing = session_with(Arc::new(TestPatternSource::failing(
            AcquireError::DeviceUnavailable("no camera".into()),
        )));
        assert!(matches!(
            missing.start().await,
            Err(CaptureError::DeviceUnavailable(_))
        ));
        assert!(matches!(
            missing.export_raw().await,
            Err(CaptureError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_png_export_is_lossless() {
        let session = pattern_session();
        session.start().await.unwrap();
        let artifact = session.export_png().await.unwrap();

        let ExportArtifact::EncodedImage {
            kind, timestamp, ref bytes,
        } = artifact
        else {
            panic!("expected encoded image, got {artifact:?}");
        };
        assert_eq!(kind, ImageKind::Lossless);
        assert_eq!(artifact.file_name(), format!("capture_{timestamp}.png"));

        let decoded = decode_png(bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (TARGET_WIDTH, TARGET_HEIGHT));
        assert_eq!(decoded, expected_first_buffer());
        assert!(session.status().message.ends_with("bytes)"));
    }

    #[tokio::test]
    async fn test_log_png_export_applies_curve() {
        let session = pattern_session();
        session.start().await.unwrap();
        let artifact = session.export_log_png().await.unwrap();
        assert!(artifact.file_name().starts_with("capture_log_"));

        let decoded = decode_png(artifact.bytes()).unwrap();
        let mut expected = expected_first_buffer();
        tone_curve::apply(&mut expected);
        assert_eq!(decoded, expected);
        assert!(decoded.as_bytes().chunks_exact(4).all(|px| px[3] == 255));
    }

    #[tokio::test]
    async fn test_raw_export_uploads_full_buffer() {
        let addr = start_upload_stub(StatusCode::OK, serde_json::json!({"ok": true})).await;
        let session = CaptureSession::new(
            Arc::new(TestPatternSource::new(SRC_W, SRC_H)),
            StreamRequest::default(),
            transport_to(&format!("http://{addr}/upload-raw")),
        );
        session.start().await.unwrap();
        let artifact = session.export_raw().await.unwrap();

        let ExportArtifact::RawPayload { ref metadata, ref bytes } = artifact else {
            panic!("expected raw payload, got {artifact:?}");
        };
        assert_eq!((metadata.width, metadata.height), (TARGET_WIDTH, TARGET_HEIGHT));
        assert_eq!(metadata.format, "RGBA8");
        assert_eq!(bytes.len(), (TARGET_WIDTH * TARGET_HEIGHT * 4) as usize);
        assert_eq!(bytes, expected_first_buffer().as_bytes());
        assert_eq!(session.status().message, "got 33177600 of 33177600 bytes");
    }

    #[tokio::test]
    async fn test_upload_500_leaves_session_reusable() {
        let addr = start_upload_stub(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({"ok": false, "message": "converter crashed"}),
        )
        .await;
        let session = CaptureSession::new(
            Arc::new(TestPatternSource::new(SRC_W, SRC_H)),
            StreamRequest::default(),
            transport_to(&format!("http://{addr}/upload-raw")),
        );
        session.start().await.unwrap();

        let err = session.export_raw().await.unwrap_err();
        assert_eq!(err, CaptureError::UploadFailed(500));
        let status = session.status();
        assert!(status.message.contains("500"), "status: {}", status.message);
        assert_eq!(status.state, SessionState::Idle);
        assert!(status.active);

        assert!(session.export_png().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let session = CaptureSession::new(
            Arc::new(TestPatternSource::new(SRC_W, SRC_H)),
            StreamRequest::default(),
            transport_to(&format!("http://{addr}/upload-raw")),
        );
        session.start().await.unwrap();
        assert!(matches!(
            session.export_raw().await,
            Err(CaptureError::TransportError(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_export_is_rejected() {
        let session = pattern_session();
        session.start().await.unwrap();

        let (first, second) = tokio::join!(session.export_png(), session.export_log_png());
        let results = [first, second];
        let busy = results
            .iter()
            .filter(|r| matches!(r, Err(CaptureError::Busy)))
            .count();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!((ok, busy), (1, 1));

        // the rejected request left the winner's outcome in place
        let message = session.status().message;
        assert!(
            message.starts_with("capture_") && message.ends_with("bytes)"),
            "status: {message}"
        );

        // guard cleared afterwards
        assert_eq!(session.status().state, SessionState::Idle);
        assert!(session.export_png().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_during_export_releases_after_completion() {
        let released = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (proceed_tx, proceed_rx) = std::sync::mpsc::channel();
        let session = session_with(Arc::new(TrackedSource::gated(
            released.clone(),
            FrameGate {
                entered: entered_tx,
                proceed: proceed_rx,
            },
        )));
        session.start().await.unwrap();

        let (result, ()) = tokio::join!(session.export_png(), async {
            // rasterizer task now holds the handle lock
            entered_rx.await.unwrap();
            session.stop();
            assert!(!session.is_active());
            assert!(!released.load(Ordering::SeqCst));
            proceed_tx.send(()).unwrap();
        });

        assert!(result.is_ok());
        assert!(released.load(Ordering::SeqCst));
        assert!(!session.is_active());
        assert!(matches!(
            session.export_png().await,
            Err(CaptureError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_releases_handle() {
        let released = Arc::new(AtomicBool::new(false));
        let session = session_with(Arc::new(TrackedSource::new(released.clone())));
        session.start().await.unwrap();
        assert!(!released.load(Ordering::SeqCst));
        session.stop();
        assert!(released.load(Ordering::SeqCst));
        assert!(matches!(
            session.export_png().await,
            Err(CaptureError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_releases_handle() {
        let released = Arc::new(AtomicBool::new(false));
        {
            let session = session_with(Arc::new(TrackedSource::new(released.clone())));
            session.start().await.unwrap();
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let session = pattern_session();
        session.start().await.unwrap();
        session.stop();
        session.start().await.unwrap();
        assert!(session.export_png().await.is_ok());
    }

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(
            CaptureError::from(TransportError::UploadFailed(503)),
            CaptureError::UploadFailed(503)
        );
        assert_eq!(
            CaptureError::from(TransportError::Rejected("no".into())),
            CaptureError::UploadRejected("no".into())
        );
        assert_eq!(
            CaptureError::UploadFailed(500).to_string(),
            "upload failed with HTTP status 500"
        );
    }

    #[test]
    fn test_status_serializes() {
        let status = SessionStatus {
            state: SessionState::Capturing,
            active: true,
            message: "capturing".into(),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({"state": "capturing", "active": true, "message": "capturing"})
        );
    }
}
