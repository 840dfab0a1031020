//! Session state machine.
//!
//! One `Session` per workflow. Every payload lives inside the variant it is valid for,
//! so a result and an error can never be held at the same time. Asynchronous work
//! (preview building, submission) is identified by a token and only applied if the
//! session still expects it.

use crate::error::{WorkflowError, NO_FILE_MESSAGE};
use crate::model::{Phase, SelectedFile, SessionView};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifies one preview computation. Stale tokens are ignored on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewToken(u64);

/// Identifies one outstanding submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionTicket(u64);

#[derive(Debug, Clone)]
pub struct Selection {
    pub file: SelectedFile,
    pub preview: Option<Arc<str>>,
    token: PreviewToken,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Idle {
        notice: Option<String>,
    },
    Ready {
        selection: Selection,
    },
    Submitting {
        selection: Selection,
        ticket: SubmissionTicket,
    },
    Succeeded {
        selection: Selection,
        result_image: String,
    },
    Failed {
        selection: Selection,
        error_message: String,
    },
}

/// Work the caller must perform after a successful `begin_submission`.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub ticket: SubmissionTicket,
    pub file: SelectedFile,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    next_preview: u64,
    next_ticket: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle { notice: None },
            next_preview: 0,
            next_ticket: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        phase_of(&self.state)
    }

    fn selection(&self) -> Option<&Selection> {
        match &self.state {
            SessionState::Idle { .. } => None,
            SessionState::Ready { selection }
            | SessionState::Submitting { selection, .. }
            | SessionState::Succeeded { selection, .. }
            | SessionState::Failed { selection, .. } => Some(selection),
        }
    }

    fn selection_mut(&mut self) -> Option<&mut Selection> {
        match &mut self.state {
            SessionState::Idle { .. } => None,
            SessionState::Ready { selection }
            | SessionState::Submitting { selection, .. }
            | SessionState::Succeeded { selection, .. }
            | SessionState::Failed { selection, .. } => Some(selection),
        }
    }

    pub fn selected_file(&self) -> Option<&SelectedFile> {
        self.selection().map(|s| &s.file)
    }

    pub fn preview(&self) -> Option<&str> {
        self.selection().and_then(|s| s.preview.as_deref())
    }

    pub fn result_image(&self) -> Option<&str> {
        match &self.state {
            SessionState::Succeeded { result_image, .. } => Some(result_image),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            SessionState::Idle { notice } => notice.as_deref(),
            SessionState::Failed { error_message, .. } => Some(error_message),
            _ => None,
        }
    }

    /// Store a newly picked file and drop any stale result or error.
    ///
    /// Returns the token the caller must attach to the preview it builds for this file.
    /// While a submission is in flight the file is replaced but the phase stays
    /// `Submitting`; otherwise the session moves to `Ready`.
    pub fn select_file(&mut self, file: SelectedFile) -> PreviewToken {
        self.next_preview += 1;
        let token = PreviewToken(self.next_preview);
        info!(name = %file.name, size = file.size(), "file selected");
        let selection = Selection {
            file,
            preview: None,
            token,
        };

        let prev = std::mem::replace(&mut self.state, SessionState::Idle { notice: None });
        self.state = match prev {
            SessionState::Submitting { ticket, .. } => {
                SessionState::Submitting { selection, ticket }
            }
            _ => SessionState::Ready { selection },
        };
        token
    }

    /// Attach a built preview. Ignored unless `token` belongs to the current file.
    pub fn apply_preview(&mut self, token: PreviewToken, data_uri: String) -> bool {
        match self.selection_mut() {
            Some(selection) if selection.token == token => {
                selection.preview = Some(data_uri.into());
                true
            }
            _ => {
                debug!(?token, "discarding stale preview");
                false
            }
        }
    }

    /// Wipe every field and return to `Idle`. Does not cancel an in-flight request;
    /// its eventual completion is discarded by `complete_submission`.
    pub fn clear_selection(&mut self) {
        if matches!(self.state, SessionState::Submitting { .. }) {
            info!("selection cleared while a submission is in flight");
        }
        self.state = SessionState::Idle { notice: None };
    }

    /// Guarded entry into `Submitting`.
    ///
    /// With no file selected, records the user-facing notice and fails without
    /// producing a request. While already submitting, fails without touching state.
    pub fn begin_submission(&mut self) -> Result<SubmitRequest, WorkflowError> {
        let prev = std::mem::replace(&mut self.state, SessionState::Idle { notice: None });
        match prev {
            SessionState::Idle { .. } => {
                self.state = SessionState::Idle {
                    notice: Some(NO_FILE_MESSAGE.to_string()),
                };
                Err(WorkflowError::NoFileSelected)
            }
            s @ SessionState::Submitting { .. } => {
                self.state = s;
                Err(WorkflowError::AlreadySubmitting)
            }
            SessionState::Ready { selection }
            | SessionState::Succeeded { selection, .. }
            | SessionState::Failed { selection, .. } => {
                self.next_ticket += 1;
                let ticket = SubmissionTicket(self.next_ticket);
                let file = selection.file.clone();
                self.state = SessionState::Submitting { selection, ticket };
                Ok(SubmitRequest { ticket, file })
            }
        }
    }

    /// Apply the outcome of a submission. Only the ticket the session is currently
    /// waiting on may change state; anything else is dropped.
    pub fn complete_submission(
        &mut self,
        ticket: SubmissionTicket,
        outcome: Result<String, WorkflowError>,
    ) -> bool {
        let prev = std::mem::replace(&mut self.state, SessionState::Idle { notice: None });
        match prev {
            SessionState::Submitting {
                selection,
                ticket: current,
            } if current == ticket => {
                self.state = match outcome {
                    Ok(result_image) => SessionState::Succeeded {
                        selection,
                        result_image,
                    },
                    Err(err) => {
                        warn!(error = %err, "analysis failed");
                        SessionState::Failed {
                            selection,
                            error_message: err.user_message(),
                        }
                    }
                };
                true
            }
            other => {
                debug!(?ticket, phase = ?phase_of(&other), "discarding stale submission outcome");
                self.state = other;
                false
            }
        }
    }

    pub fn view(&self) -> SessionView {
        let file = self.selected_file();
        let preview = self.selection().and_then(|s| s.preview.clone());
        SessionView {
            phase: self.phase(),
            file_name: file.map(|f| f.name.clone()),
            file_size: file.map(SelectedFile::size),
            preview_ready: self.preview().is_some(),
            preview,
            result_image: self.result_image().map(str::to_string),
            error_message: self.error_message().map(str::to_string),
        }
    }
}

fn phase_of(state: &SessionState) -> Phase {
    match state {
        SessionState::Idle { .. } => Phase::Idle,
        SessionState::Ready { .. } => Phase::Ready,
        SessionState::Submitting { .. } => Phase::Submitting,
        SessionState::Succeeded { .. } => Phase::Succeeded,
        SessionState::Failed { .. } => Phase::Failed,
    }
}
