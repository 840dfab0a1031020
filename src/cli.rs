use crate::model::{AnalysisReport, InfoEvent, Phase, SessionView, WorkflowConfig, WorkflowEvent};
use crate::workflow::{run_controller, UiCommand};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

pub const DEFAULT_BASE_URL: &str = "https://hardhat-detection-backend.onrender.com";

/// Output line routing for stdout/stderr writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
///
/// Locks are taken per line: the tracing subscriber writes to the same stderr from
/// other threads and must never wait on this one.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let mut out = std::io::stdout().lock();
                    let _ = writeln!(out, "{}", msg);
                    let _ = out.flush();
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(std::io::stderr().lock(), "{}", msg);
                }
            }
        }
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "hardhat-cli",
    version,
    about = "Hard hat safety detection client with optional TUI"
)]
pub struct Cli {
    /// Image to select on launch
    pub image: Option<PathBuf>,

    /// Root URL of the detection service
    #[arg(long, env = "HARDHAT_API_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Print JSON result and exit (no TUI, requires IMAGE)
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit (no TUI, requires IMAGE)
    #[arg(long)]
    pub text: bool,

    /// Save the annotated result after a successful analysis (JSON/text modes)
    #[arg(long)]
    pub download: bool,

    /// Directory the annotated result is saved into [default: Downloads folder]
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Log filter, e.g. "info" or "hardhat_cli=debug" (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn is_headless(&self) -> bool {
        self.json || self.text
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text are mutually exclusive."));
    }
    if args.is_headless() && args.image.is_none() {
        return Err(anyhow::anyhow!(
            "--json and --text need an IMAGE to analyze."
        ));
    }
    if args.download && !args.is_headless() {
        return Err(anyhow::anyhow!(
            "--download only applies to --json or --text. Press 'd' in the TUI instead."
        ));
    }

    let cfg = build_config(&args)?;

    if !args.is_headless() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, cfg).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            return Err(anyhow::anyhow!(
                "built without TUI support; use --json or --text with an IMAGE"
            ));
        }
    }

    run_headless(args, cfg).await
}

/// Build a `WorkflowConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<WorkflowConfig> {
    let parsed = reqwest::Url::parse(args.base_url.trim())
        .with_context(|| format!("invalid --base-url {:?}", args.base_url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow::anyhow!(
            "--base-url must be http or https, got {}",
            parsed.scheme()
        ));
    }
    let download_dir = match args.download_dir.clone() {
        Some(dir) => dir,
        None => match dirs::download_dir() {
            Some(dir) => dir,
            None => std::env::current_dir().context("get current directory")?,
        },
    };
    Ok(WorkflowConfig {
        base_url: parsed.as_str().trim_end_matches('/').to_string(),
        download_dir,
        user_agent: format!("hardhat-cli/{}", env!("CARGO_PKG_VERSION")),
    })
}

async fn run_headless(args: Cli, cfg: WorkflowConfig) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let res = drive_headless(&args, cfg, &out_tx).await;
    drop(out_tx);
    let _ = out_handle.await;
    res
}

/// Select, analyze, optionally download, then emit the outcome as output lines.
pub(crate) async fn drive_headless(
    args: &Cli,
    cfg: WorkflowConfig,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let image = args.image.clone().context("no IMAGE to analyze")?;
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let endpoint = format!("{}{}", cfg.base_url, crate::transfer::PREDICT_PATH);
    let handle = tokio::spawn(run_controller(cfg, evt_tx, cmd_rx));

    // Commands are handled in order, so the submit always sees the loaded file
    // (or the load failure).
    let _ = cmd_tx.send(UiCommand::Select(image));
    let _ = cmd_tx.send(UiCommand::Submit);

    let mut view = SessionView::default();
    let mut report = AnalysisReport {
        endpoint,
        session: view.clone(),
        elapsed_ms: None,
        finished_at: None,
        saved_to: None,
        load_error: None,
    };
    let mut save_error: Option<String> = None;
    let mut awaiting_download = false;

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            WorkflowEvent::StateChanged(v) => {
                let entered = v.phase != view.phase;
                view = v;
                match view.phase {
                    Phase::Submitting if entered && args.text => {
                        let _ = out_tx.send(OutputLine::Stderr(format!(
                            "Analyzing {}…",
                            view.file_name.as_deref().unwrap_or("image")
                        )));
                    }
                    // Nothing was selected, so the submit only produced the notice.
                    Phase::Idle if view.error_message.is_some() => break,
                    _ => {}
                }
            }
            // Follows the terminal state change for the same submission.
            WorkflowEvent::SubmissionSettled {
                applied: true,
                elapsed,
                finished_at,
            } => {
                report.elapsed_ms = Some(elapsed.as_millis() as u64);
                report.finished_at = Some(finished_at);
                if view.phase == Phase::Succeeded && args.download {
                    awaiting_download = true;
                    let _ = cmd_tx.send(UiCommand::Download);
                } else {
                    break;
                }
            }
            WorkflowEvent::SubmissionSettled { .. } => {}
            WorkflowEvent::Info(InfoEvent::LoadFailed { reason, .. }) => {
                report.load_error = Some(reason);
                break;
            }
            WorkflowEvent::Info(InfoEvent::ResultSaved { path }) if awaiting_download => {
                report.saved_to = Some(path);
                break;
            }
            WorkflowEvent::Info(InfoEvent::SaveFailed { reason }) if awaiting_download => {
                save_error = Some(reason);
                break;
            }
            WorkflowEvent::Info(info) => {
                if args.text {
                    let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                }
            }
        }
    }

    let _ = cmd_tx.send(UiCommand::Quit);
    handle.await.context("workflow task failed")??;

    report.session = view;
    if args.json {
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in crate::text_summary::build_text_summary(&report).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    if let Some(reason) = report.load_error {
        return Err(anyhow::anyhow!("{reason}"));
    }
    if let Some(reason) = save_error {
        return Err(anyhow::anyhow!("download failed: {reason}"));
    }
    match (&report.session.phase, &report.session.error_message) {
        (Phase::Succeeded, _) => Ok(()),
        (_, Some(msg)) => Err(anyhow::anyhow!("{msg}")),
        (phase, None) => Err(anyhow::anyhow!(
            "analysis ended unexpectedly in phase {phase:?}"
        )),
    }
}
