//! File selection helpers: reading a picked file, interpreting drop payloads,
//! and building the local preview.

use crate::error::WorkflowError;
use crate::model::SelectedFile;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Url;
use std::io;
use std::path::{Path, PathBuf};

/// Read a user-picked file into memory.
pub async fn load_file(path: &Path) -> Result<SelectedFile, WorkflowError> {
    let read_err = |source: io::Error| WorkflowError::FileRead {
        path: path.to_path_buf(),
        source,
    };
    let meta = tokio::fs::metadata(path).await.map_err(read_err)?;
    if !meta.is_file() {
        return Err(read_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    let bytes = tokio::fs::read(path).await.map_err(read_err)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SelectedFile::new(name, bytes))
}

/// Interpret a terminal drop (bracketed paste) as a file path.
///
/// Terminals hand over dropped files as text: a bare path, a quoted path, a path with
/// backslash-escaped spaces, or a `file://` URI. Anything that does not resolve to an
/// existing regular file yields `None` and must be ignored without surfacing an error.
pub fn parse_drop_payload(payload: &str) -> Option<PathBuf> {
    let trimmed = payload.trim();
    if trimmed.is_empty() || trimmed.contains(['\n', '\r']) {
        return None;
    }
    let unquoted = strip_quotes(trimmed);
    let path = if unquoted.starts_with("file:") {
        Url::parse(unquoted).ok()?.to_file_path().ok()?
    } else {
        PathBuf::from(unquoted.replace("\\ ", " "))
    };
    path.is_file().then_some(path)
}

fn strip_quotes(s: &str) -> &str {
    for q in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Local preview of a file as a `data:` URI. Never sent over the wire.
pub fn build_preview(file: &SelectedFile) -> String {
    format!(
        "data:{};base64,{}",
        file.mime_type(),
        STANDARD.encode(&file.bytes)
    )
}
