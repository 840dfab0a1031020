use std::path::PathBuf;
use thiserror::Error;

/// Message shown when analyze is triggered without a selected image.
pub const NO_FILE_MESSAGE: &str = "Please select an image first.";
/// Message shown for every failed analysis attempt, whatever the cause.
pub const ANALYSIS_FAILED_MESSAGE: &str = "Failed to analyze image. Please try again.";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no image selected")]
    NoFileSelected,
    #[error("an analysis request is already in flight")]
    AlreadySubmitting,
    #[error("detection service responded with HTTP {status}")]
    Service { status: u16 },
    #[error("malformed detection response: {0}")]
    MalformedResponse(String),
    #[error("request to detection service failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to save result: {0}")]
    Download(String),
}

impl WorkflowError {
    /// Text shown to the user. Service, malformed and transport failures are
    /// indistinguishable at this level; the detail only goes to the log.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::NoFileSelected => NO_FILE_MESSAGE.to_string(),
            WorkflowError::Service { .. }
            | WorkflowError::MalformedResponse(_)
            | WorkflowError::Transport(_) => ANALYSIS_FAILED_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
