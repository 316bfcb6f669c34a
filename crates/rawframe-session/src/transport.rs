//! Multipart upload of raw payloads to the processing endpoint.
//!
//! One POST per payload with two parts: `meta` (JSON metadata) and `raw`
//! (octet-stream named `capture_<timestamp>.rgba`). No retries.

use rawframe_core::packager::{META_FIELD, RAW_FIELD};
use rawframe_core::RawPayload;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// No HTTP response: connect, timeout, or body write failure.
    #[error("transport error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("upload failed with HTTP status {0}")]
    UploadFailed(u16),
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("metadata serialization failed: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Successful upload outcome as reported by the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub status: u16,
    pub message: String,
}

/// `{ok: bool, message|saved: string}`; every field optional on the wire.
#[derive(Debug, Deserialize)]
struct UploadReply {
    ok: Option<bool>,
    message: Option<String>,
    saved: Option<String>,
}

/// HTTP client bound to one upload endpoint.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    endpoint: String,
}

impl Transport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            // A followed 302/303 turns the POST into a bodyless GET.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// POST `payload` and surface the endpoint's status message.
    pub async fn send(&self, payload: &RawPayload<'_>) -> Result<UploadOutcome, TransportError> {
        let file_name = payload.file_name();
        let meta = Part::text(payload.metadata.to_json()?).mime_str("application/json")?;
        let raw = Part::bytes(payload.raw.to_vec())
            .file_name(file_name.clone())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part(META_FIELD, meta).part(RAW_FIELD, raw);

        tracing::info!(
            endpoint = %self.endpoint,
            file = %file_name,
            bytes = payload.raw.len(),
            "uploading raw payload"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "upload returned error status");
            return Err(TransportError::UploadFailed(status.as_u16()));
        }

        let body = response.bytes().await?;
        let outcome = interpret_reply(status.as_u16(), &body)?;
        tracing::info!(status = outcome.status, message = %outcome.message, "upload complete");
        Ok(outcome)
    }
}

/// Turn a 2xx body into an outcome. Non-JSON bodies count as success.
fn interpret_reply(status: u16, body: &[u8]) -> Result<UploadOutcome, TransportError> {
    let Ok(reply) = serde_json::from_slice::<UploadReply>(body) else {
        return Ok(UploadOutcome {
            status,
            message: format!("uploaded (HTTP {status})"),
        });
    };

    let message = reply
        .message
        .or(reply.saved.map(|path| format!("saved {path}")))
        .unwrap_or_else(|| format!("uploaded (HTTP {status})"));

    if reply.ok == Some(false) {
        return Err(TransportError::Rejected(message));
    }
    Ok(UploadOutcome { status, message })
}
