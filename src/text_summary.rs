//! Text summary builder for CLI output.
//!
//! Formats the outcome of a headless analysis as human-readable lines.

use crate::model::{format_size, AnalysisReport, Phase};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Result references can be multi-megabyte data URIs; keep the printed form short.
pub(crate) fn abbreviate(reference: &str) -> String {
    const MAX: usize = 72;
    if reference.chars().count() <= MAX {
        return reference.to_string();
    }
    let head: String = reference.chars().take(MAX - 1).collect();
    format!("{head}… ({} chars)", reference.chars().count())
}

pub(crate) fn build_text_summary(report: &AnalysisReport) -> TextSummary {
    let mut lines = Vec::new();
    let session = &report.session;

    lines.push(format!("Endpoint: {}", report.endpoint));
    if let Some(name) = session.file_name.as_deref() {
        let size = session.file_size.map(format_size).unwrap_or_else(|| "-".into());
        lines.push(format!("Image: {name} ({size})"));
    }
    lines.push(format!("Status: {}", session.phase.label()));

    if let Some(ms) = report.elapsed_ms {
        lines.push(format!("Elapsed: {ms} ms"));
    }
    if let Some(at) = report.finished_at.as_deref() {
        lines.push(format!("Finished: {at}"));
    }

    if let Some(reason) = report.load_error.as_deref() {
        lines.push(format!("Error: {reason}"));
    }

    match session.phase {
        Phase::Succeeded => {
            if let Some(image) = session.result_image.as_deref() {
                lines.push(format!("Annotated image: {}", abbreviate(image)));
            }
        }
        _ => {
            if let Some(msg) = session.error_message.as_deref() {
                lines.push(format!("Error: {msg}"));
            }
        }
    }

    if let Some(path) = report.saved_to.as_deref() {
        lines.push(format!("Saved: {}", path.display()));
    }

    TextSummary { lines }
}
