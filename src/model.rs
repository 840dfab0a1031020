use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Detection service root, without a trailing slash.
    pub base_url: String,
    pub download_dir: PathBuf,
    pub user_agent: String,
}

/// An image picked by the user, read fully into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Best-effort MIME type from the file extension.
    pub fn mime_type(&self) -> &'static str {
        let ext = self
            .name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "bmp" => "image/bmp",
            "tif" | "tiff" => "image/tiff",
            _ => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Ready,
    Submitting,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Ready => "Ready",
            Phase::Submitting => "Analyzing",
            Phase::Succeeded => "Complete",
            Phase::Failed => "Failed",
        }
    }
}

/// Read-only snapshot of a session for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub phase: Phase,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub preview_ready: bool,
    /// Local `data:` URI of the selected file. Shared, since snapshots are cloned on
    /// every state change; left out of JSON output.
    #[serde(skip)]
    pub preview: Option<Arc<str>>,
    pub result_image: Option<String>,
    pub error_message: Option<String>,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            file_name: None,
            file_size: None,
            preview_ready: false,
            preview: None,
            result_image: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StateChanged(SessionView),
    /// A submission task finished. `applied` is false when the session had already
    /// moved on and the outcome was dropped.
    SubmissionSettled {
        applied: bool,
        elapsed: Duration,
        finished_at: String,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Message(String),
    FileLoaded { name: String, size: u64 },
    /// A picked or dropped file could not be read; the session is unchanged.
    LoadFailed { path: PathBuf, reason: String },
    ResultSaved { path: PathBuf },
    SaveFailed { reason: String },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::FileLoaded { name, size } => {
                format!("Selected {} ({})", name, format_size(*size))
            }
            InfoEvent::LoadFailed { reason, .. } => reason.clone(),
            InfoEvent::ResultSaved { path } => format!("Saved: {}", path.display()),
            InfoEvent::SaveFailed { reason } => format!("Download failed: {reason}"),
        }
    }
}

/// Final outcome of a headless run, printed in `--json` mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub endpoint: String,
    pub session: SessionView,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub saved_to: Option<PathBuf>,
    /// Why IMAGE could not be read, when it never made it into the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

/// Status line for a finished analysis, e.g. "Analysis finished in 1s 250ms".
pub fn describe_elapsed(elapsed: Duration) -> String {
    // Millisecond precision is plenty for a human reading the status line.
    let rounded = Duration::from_millis(elapsed.as_millis() as u64);
    format!(
        "Analysis finished in {}",
        humantime::format_duration(rounded)
    )
}

/// Format a byte count the way the upload area shows it (e.g. "1.95 MB").
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
