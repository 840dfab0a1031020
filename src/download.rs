//! Saving the annotated result to disk.

use crate::error::WorkflowError;
use crate::transfer::DetectionClient;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use tracing::info;

/// Fixed name the result is offered under.
pub const RESULT_FILENAME: &str = "safety-analysis-result.jpg";

/// Decode a base64 `data:` URI into raw bytes.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, WorkflowError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| WorkflowError::Download("not a data URI".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| WorkflowError::Download("data URI has no payload".into()))?;
    if !header.ends_with(";base64") {
        return Err(WorkflowError::Download(
            "only base64 data URIs are supported".into(),
        ));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|e| WorkflowError::Download(format!("invalid base64 payload: {e}")))
}

/// Write the result image to `dir/safety-analysis-result.jpg`, overwriting any
/// previous download. URL results are fetched with the detection client.
pub async fn save_result(
    client: &DetectionClient,
    result_image: &str,
    dir: &Path,
) -> Result<PathBuf, WorkflowError> {
    let bytes = if result_image.starts_with("data:") {
        decode_data_uri(result_image)?
    } else if result_image.starts_with("http://") || result_image.starts_with("https://") {
        client.fetch_result(result_image).await?.to_vec()
    } else {
        return Err(WorkflowError::Download(
            "unsupported result reference".into(),
        ));
    };

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| WorkflowError::Download(format!("create {}: {e}", dir.display())))?;
    let path = dir.join(RESULT_FILENAME);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| WorkflowError::Download(format!("write {}: {e}", path.display())))?;
    info!(path = %path.display(), bytes = bytes.len(), "result saved");
    Ok(path)
}
