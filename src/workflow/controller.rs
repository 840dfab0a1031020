//! Upload workflow controller.
//!
//! Owns the session and is its only mutator. Preview building and submissions run as
//! spawned tasks that report back here; the session decides whether each completion is
//! still relevant.

use super::selection::{build_preview, load_file, parse_drop_payload};
use super::session::{PreviewToken, Session, SubmissionTicket, SubmitRequest};
use crate::download;
use crate::error::WorkflowError;
use crate::model::{InfoEvent, Phase, SelectedFile, WorkflowConfig, WorkflowEvent};
use crate::transfer::DetectionClient;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Commands emitted by UI layers to drive the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    /// Click-to-browse: a path chosen explicitly by the user.
    Select(PathBuf),
    /// Drag-and-drop: raw payload as delivered by the terminal.
    Drop(String),
    Submit,
    Clear,
    Download,
    Quit,
}

/// Results of spawned work, routed back into the command loop.
enum Completion {
    Preview {
        token: PreviewToken,
        data_uri: String,
    },
    Submission {
        ticket: SubmissionTicket,
        outcome: Result<String, WorkflowError>,
        elapsed: Duration,
    },
    Saved(Result<PathBuf, WorkflowError>),
}

fn emit_state(event_tx: &UnboundedSender<WorkflowEvent>, session: &Session) {
    let _ = event_tx.send(WorkflowEvent::StateChanged(session.view()));
}

fn emit_info(event_tx: &UnboundedSender<WorkflowEvent>, info: InfoEvent) {
    let _ = event_tx.send(WorkflowEvent::Info(info));
}

fn spawn_preview(file: SelectedFile, token: PreviewToken, done_tx: UnboundedSender<Completion>) {
    tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || build_preview(&file)).await {
            Ok(data_uri) => {
                let _ = done_tx.send(Completion::Preview { token, data_uri });
            }
            Err(e) => warn!(error = %e, "preview task failed"),
        }
    });
}

fn spawn_submission(
    client: &DetectionClient,
    req: SubmitRequest,
    done_tx: UnboundedSender<Completion>,
) {
    let client = client.clone();
    tokio::spawn(async move {
        let started = Instant::now();
        let outcome = client.analyze(&req.file).await;
        let _ = done_tx.send(Completion::Submission {
            ticket: req.ticket,
            outcome,
            elapsed: started.elapsed(),
        });
    });
}

async fn select_path(
    path: &Path,
    session: &mut Session,
    event_tx: &UnboundedSender<WorkflowEvent>,
    done_tx: &UnboundedSender<Completion>,
) {
    match load_file(path).await {
        Ok(file) => {
            let token = session.select_file(file.clone());
            emit_info(
                event_tx,
                InfoEvent::FileLoaded {
                    name: file.name.clone(),
                    size: file.size(),
                },
            );
            emit_state(event_tx, session);
            spawn_preview(file, token, done_tx.clone());
        }
        Err(e) => {
            // A failed read is like a cancelled picker: nothing about the session changes.
            warn!(error = %e, "could not load selected file");
            emit_info(
                event_tx,
                InfoEvent::LoadFailed {
                    path: path.to_path_buf(),
                    reason: e.user_message(),
                },
            );
        }
    }
}

/// Run the workflow until `Quit` arrives or the command channel closes.
pub async fn run_controller(
    cfg: WorkflowConfig,
    event_tx: UnboundedSender<WorkflowEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let client = DetectionClient::new(&cfg)?;
    info!(endpoint = %client.endpoint(), "workflow started");

    let mut session = Session::new();
    // The controller keeps a sender alive, so `done_rx` never yields `None`.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    emit_state(&event_tx, &session);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Select(path)) => {
                        select_path(&path, &mut session, &event_tx, &done_tx).await;
                    }
                    Some(UiCommand::Drop(payload)) => match parse_drop_payload(&payload) {
                        Some(path) => select_path(&path, &mut session, &event_tx, &done_tx).await,
                        None => debug!("ignoring drop payload that is not a file"),
                    },
                    Some(UiCommand::Submit) => match session.begin_submission() {
                        Ok(req) => {
                            info!(name = %req.file.name, size = req.file.size(), "submitting image");
                            emit_state(&event_tx, &session);
                            spawn_submission(&client, req, done_tx.clone());
                        }
                        Err(WorkflowError::NoFileSelected) => {
                            info!("submit requested with no file selected");
                            emit_state(&event_tx, &session);
                        }
                        Err(e) => debug!(error = %e, "submit ignored"),
                    },
                    Some(UiCommand::Clear) => {
                        session.clear_selection();
                        emit_state(&event_tx, &session);
                    }
                    Some(UiCommand::Download) => match session.result_image() {
                        Some(image) => {
                            let client = client.clone();
                            let image = image.to_string();
                            let dir = cfg.download_dir.clone();
                            let done_tx = done_tx.clone();
                            tokio::spawn(async move {
                                let res = download::save_result(&client, &image, &dir).await;
                                let _ = done_tx.send(Completion::Saved(res));
                            });
                        }
                        None => emit_info(
                            &event_tx,
                            InfoEvent::Message("No analysis result to download yet.".into()),
                        ),
                    },
                    Some(UiCommand::Quit) | None => {
                        if session.phase() == Phase::Submitting {
                            info!("quitting with a submission in flight");
                        }
                        break;
                    }
                }
            }
            Some(done) = done_rx.recv() => {
                match done {
                    Completion::Preview { token, data_uri } => {
                        if session.apply_preview(token, data_uri) {
                            emit_state(&event_tx, &session);
                        }
                    }
                    // The state change goes out before the settle event; headless
                    // callers wait for the latter.
                    Completion::Submission { ticket, outcome, elapsed } => {
                        let applied = session.complete_submission(ticket, outcome);
                        let finished_at = time::OffsetDateTime::now_utc()
                            .format(&time::format_description::well_known::Rfc3339)
                            .unwrap_or_else(|_| "now".into());
                        if applied {
                            emit_state(&event_tx, &session);
                        }
                        let _ = event_tx.send(WorkflowEvent::SubmissionSettled {
                            applied,
                            elapsed,
                            finished_at,
                        });
                    }
                    Completion::Saved(Ok(path)) => {
                        emit_info(&event_tx, InfoEvent::ResultSaved { path });
                    }
                    Completion::Saved(Err(e)) => {
                        warn!(error = %e, "download failed");
                        emit_info(&event_tx, InfoEvent::SaveFailed { reason: e.to_string() });
                    }
                }
            }
        }
    }

    info!("workflow finished");
    Ok(())
}
