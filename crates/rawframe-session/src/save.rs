//! Writes export artifacts to disk under their conventional file names.

use rawframe_core::ExportArtifact;
use std::path::{Path, PathBuf};

/// Save `artifact` into `dir`, returning the written path.
///
/// Raw payloads also get a `capture_<timestamp>.json` sidecar carrying the
/// metadata document, since the `.rgba` bytes are headerless.
pub async fn save_artifact(dir: &Path, artifact: &ExportArtifact) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(artifact.file_name());
    tokio::fs::write(&path, artifact.bytes()).await?;

    if let ExportArtifact::RawPayload { metadata, .. } = artifact {
        let sidecar = path.with_extension("json");
        tokio::fs::write(&sidecar, serde_json::to_vec_pretty(metadata)?).await?;
        tracing::debug!(path = %sidecar.display(), "metadata sidecar written");
    }

    tracing::info!(path = %path.display(), bytes = artifact.bytes().len(), "artifact saved");
    Ok(path)
}
