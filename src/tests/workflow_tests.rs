use crate::cli::{build_config, drive_headless, Cli, OutputLine};
use crate::download::RESULT_FILENAME;
use crate::error::{ANALYSIS_FAILED_MESSAGE, NO_FILE_MESSAGE};
use crate::model::{InfoEvent, Phase, SessionView, WorkflowConfig, WorkflowEvent};
use crate::workflow::{run_controller, UiCommand};
use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};

const ANNOTATED: &str = "data:image/jpeg;base64,AAA";

#[derive(Debug, Clone)]
struct ReceivedField {
    name: String,
    file_name: Option<String>,
    len: usize,
}

#[derive(Clone)]
struct ServerState {
    hits: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<ReceivedField>>>,
    gate: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
    status: StatusCode,
    body: String,
}

async fn handle_predict(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> (StatusCode, String) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let len = field.bytes().await.map(|b| b.len()).unwrap_or_default();
        state.received.lock().await.push(ReceivedField {
            name,
            file_name,
            len,
        });
    }
    let gate = state.gate.lock().await.take();
    if let Some(gate) = gate {
        let _ = gate.await;
    }
    (state.status, state.body.clone())
}

async fn handle_annotated() -> Vec<u8> {
    vec![0xff, 0xd8, 0xff, 0xd9]
}

/// Start a fake detection service. `{base}` in `body` is replaced with the server URL.
async fn spawn_detection_server(
    status: StatusCode,
    body: &str,
    gate: Option<oneshot::Receiver<()>>,
) -> Result<(String, ServerState)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let state = ServerState {
        hits: Arc::new(AtomicUsize::new(0)),
        received: Arc::new(Mutex::new(Vec::new())),
        gate: Arc::new(Mutex::new(gate)),
        status,
        body: body.replace("{base}", &base),
    };
    let app = Router::new()
        .route("/predict", post(handle_predict))
        .route("/annotated.jpg", get(handle_annotated))
        .layer(DefaultBodyLimit::disable())
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((base, state))
}

/// A base URL nothing listens on.
async fn unreachable_base_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

fn success_body() -> String {
    format!(r#"{{"annotated_image":"{ANNOTATED}"}}"#)
}

fn write_image(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![0xabu8; len]).expect("write image");
    path
}

struct Harness {
    cmd_tx: mpsc::UnboundedSender<UiCommand>,
    evt_rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    handle: JoinHandle<Result<()>>,
    dir: tempfile::TempDir,
}

impl Harness {
    async fn start(base_url: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = WorkflowConfig {
            base_url: base_url.to_string(),
            download_dir: dir.path().join("downloads"),
            user_agent: "hardhat-cli/test".into(),
        };
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_controller(cfg, evt_tx, cmd_rx));
        let mut harness = Self {
            cmd_tx,
            evt_rx,
            handle,
            dir,
        };
        let initial = harness.wait_for_phase(Phase::Idle).await;
        assert_eq!(initial, SessionView::default());
        harness
    }

    fn send(&self, cmd: UiCommand) {
        self.cmd_tx.send(cmd).expect("controller alive");
    }

    async fn next_event(&mut self) -> WorkflowEvent {
        tokio::time::timeout(Duration::from_secs(10), self.evt_rx.recv())
            .await
            .expect("timed out waiting for workflow event")
            .expect("event channel closed")
    }

    async fn wait_for_phase(&mut self, phase: Phase) -> SessionView {
        loop {
            if let WorkflowEvent::StateChanged(view) = self.next_event().await {
                if view.phase == phase {
                    return view;
                }
            }
        }
    }

    async fn wait_for_view(&mut self, pred: impl Fn(&SessionView) -> bool) -> SessionView {
        loop {
            if let WorkflowEvent::StateChanged(view) = self.next_event().await {
                if pred(&view) {
                    return view;
                }
            }
        }
    }

    /// Select a file and wait until its preview has landed, so no preview event can
    /// interleave with later assertions.
    async fn select_with_preview(&mut self, path: PathBuf) -> SessionView {
        self.send(UiCommand::Select(path));
        self.wait_for_view(|v| v.phase == Phase::Ready && v.preview_ready)
            .await
    }

    /// Returns whether the settled submission was applied to the session.
    async fn wait_settled(&mut self) -> bool {
        loop {
            if let WorkflowEvent::SubmissionSettled { applied, .. } = self.next_event().await {
                return applied;
            }
        }
    }

    /// Ask for something that only produces an info message and return the very next event.
    /// Proves nothing else was queued ahead of it.
    async fn request_download(&mut self) -> WorkflowEvent {
        self.send(UiCommand::Download);
        self.next_event().await
    }

    async fn shutdown(self) {
        let _ = self.cmd_tx.send(UiCommand::Quit);
        self.handle
            .await
            .expect("controller join")
            .expect("controller result");
    }
}

fn is_nothing_to_download(ev: &WorkflowEvent) -> bool {
    matches!(
        ev,
        WorkflowEvent::Info(InfoEvent::Message(msg)) if msg == "No analysis result to download yet."
    )
}

#[tokio::test]
async fn analyze_success_stores_annotated_image() {
    let (base, server) = spawn_detection_server(StatusCode::OK, &success_body(), None)
        .await
        .expect("spawn server");
    let mut h = Harness::start(&base).await;
    let photo = write_image(h.dir.path(), "photo.jpg", 2 * 1024 * 1024);

    h.send(UiCommand::Select(photo));
    let ready = h.wait_for_phase(Phase::Ready).await;
    assert_eq!(ready.file_name.as_deref(), Some("photo.jpg"));
    assert_eq!(ready.file_size, Some(2 * 1024 * 1024));

    h.send(UiCommand::Submit);
    h.wait_for_phase(Phase::Submitting).await;
    let done = h.wait_for_phase(Phase::Succeeded).await;
    assert_eq!(done.result_image.as_deref(), Some(ANNOTATED));
    assert_eq!(done.error_message, None);

    let fields = server.received.lock().await.clone();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name, "file");
    assert_eq!(fields[0].file_name.as_deref(), Some("photo.jpg"));
    assert_eq!(fields[0].len, 2 * 1024 * 1024);
    h.shutdown().await;
}

#[tokio::test]
async fn submit_without_file_never_hits_the_network() {
    let (base, server) = spawn_detection_server(StatusCode::OK, &success_body(), None)
        .await
        .expect("spawn server");
    let mut h = Harness::start(&base).await;

    h.send(UiCommand::Submit);
    match h.next_event().await {
        WorkflowEvent::StateChanged(view) => {
            assert_eq!(view.phase, Phase::Idle);
            assert_eq!(view.error_message.as_deref(), Some(NO_FILE_MESSAGE));
            assert_eq!(view.result_image, None);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(is_nothing_to_download(&h.request_download().await));
    assert_eq!(server.hits.load(Ordering::SeqCst), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn service_error_fails_and_keeps_selection_for_retry() {
    let (base, server) = spawn_detection_server(StatusCode::INTERNAL_SERVER_ERROR, "boom", None)
        .await
        .expect("spawn server");
    let mut h = Harness::start(&base).await;
    let photo = write_image(h.dir.path(), "photo.jpg", 1024);

    h.send(UiCommand::Select(photo));
    h.wait_for_phase(Phase::Ready).await;
    h.send(UiCommand::Submit);
    let failed = h.wait_for_phase(Phase::Failed).await;
    assert_eq!(failed.error_message.as_deref(), Some(ANALYSIS_FAILED_MESSAGE));
    assert_eq!(failed.result_image, None);
    assert_eq!(failed.file_name.as_deref(), Some("photo.jpg"));

    // Retry straight from Failed without re-picking.
    h.send(UiCommand::Submit);
    let retrying = h.wait_for_phase(Phase::Submitting).await;
    assert_eq!(retrying.error_message, None);
    h.wait_for_phase(Phase::Failed).await;
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    h.shutdown().await;
}

#[tokio::test]
async fn malformed_success_bodies_fail_like_service_errors() {
    for body in [r#"{"something":"else"}"#, "not json", r#"{"error":"Model is not loaded."}"#] {
        let (base, _server) = spawn_detection_server(StatusCode::OK, body, None)
            .await
            .expect("spawn server");
        let mut h = Harness::start(&base).await;
        let photo = write_image(h.dir.path(), "photo.png", 64);

        h.send(UiCommand::Select(photo));
        h.send(UiCommand::Submit);
        let failed = h.wait_for_phase(Phase::Failed).await;
        assert_eq!(failed.error_message.as_deref(), Some(ANALYSIS_FAILED_MESSAGE));
        h.shutdown().await;
    }
}

#[tokio::test]
async fn transport_failure_fails_like_service_errors() {
    let base = unreachable_base_url().await.expect("reserve port");
    let mut h = Harness::start(&base).await;
    let photo = write_image(h.dir.path(), "photo.jpg", 64);

    h.send(UiCommand::Select(photo));
    h.send(UiCommand::Submit);
    let failed = h.wait_for_phase(Phase::Failed).await;
    assert_eq!(failed.error_message.as_deref(), Some(ANALYSIS_FAILED_MESSAGE));
    assert!(failed.file_name.is_some());
    h.shutdown().await;
}

#[tokio::test]
async fn non_file_drop_changes_nothing() {
    let base = unreachable_base_url().await.expect("reserve port");
    let mut h = Harness::start(&base).await;

    h.send(UiCommand::Drop("some copied text".into()));
    h.send(UiCommand::Drop(h.dir.path().display().to_string()));
    h.send(UiCommand::Drop(String::new()));
    assert!(is_nothing_to_download(&h.request_download().await));

    // A real file dropped the same way is selected.
    let photo = write_image(h.dir.path(), "dropped photo.jpg", 32);
    h.send(UiCommand::Drop(format!("'{}'", photo.display())));
    let ready = h.wait_for_phase(Phase::Ready).await;
    assert_eq!(ready.file_name.as_deref(), Some("dropped photo.jpg"));
    h.shutdown().await;
}

#[tokio::test]
async fn clear_after_success_resets_everything() {
    let (base, _server) = spawn_detection_server(StatusCode::OK, &success_body(), None)
        .await
        .expect("spawn server");
    let mut h = Harness::start(&base).await;
    let photo = write_image(h.dir.path(), "photo.jpg", 128);

    h.send(UiCommand::Select(photo));
    h.send(UiCommand::Submit);
    h.wait_for_phase(Phase::Succeeded).await;

    h.send(UiCommand::Clear);
    assert_eq!(h.wait_for_phase(Phase::Idle).await, SessionView::default());
    h.send(UiCommand::Clear);
    assert_eq!(h.wait_for_phase(Phase::Idle).await, SessionView::default());
    h.shutdown().await;
}

#[tokio::test]
async fn response_after_clear_is_discarded() {
    for (status, body) in [
        (StatusCode::OK, success_body()),
        (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string()),
    ] {
        let (release, gate) = oneshot::channel();
        let (base, server) = spawn_detection_server(status, &body, Some(gate))
            .await
            .expect("spawn server");
        let mut h = Harness::start(&base).await;
        let photo = write_image(h.dir.path(), "photo.jpg", 256);

        h.select_with_preview(photo).await;
        h.send(UiCommand::Submit);
        h.wait_for_phase(Phase::Submitting).await;
        h.send(UiCommand::Clear);
        assert_eq!(h.wait_for_phase(Phase::Idle).await, SessionView::default());

        let _ = release.send(());
        assert!(!h.wait_settled().await, "stale outcome must not apply");
        // Nothing else was emitted: the next event answers the download request.
        assert!(is_nothing_to_download(&h.request_download().await));
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);
        h.shutdown().await;
    }
}

#[tokio::test]
async fn second_submit_while_in_flight_is_ignored() {
    let (release, gate) = oneshot::channel();
    let (base, server) = spawn_detection_server(StatusCode::OK, &success_body(), Some(gate))
        .await
        .expect("spawn server");
    let mut h = Harness::start(&base).await;
    let photo = write_image(h.dir.path(), "photo.jpg", 256);

    h.select_with_preview(photo).await;
    h.send(UiCommand::Submit);
    h.wait_for_phase(Phase::Submitting).await;
    h.send(UiCommand::Submit);
    assert!(is_nothing_to_download(&h.request_download().await));

    let _ = release.send(());
    h.wait_for_phase(Phase::Succeeded).await;
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn reselect_replaces_file_and_preview() {
    let base = unreachable_base_url().await.expect("reserve port");
    let mut h = Harness::start(&base).await;
    let a = write_image(h.dir.path(), "a.png", 10);
    let b = write_image(h.dir.path(), "b.png", 20);

    h.send(UiCommand::Select(a));
    h.send(UiCommand::Select(b));
    let view = h
        .wait_for_view(|v| v.file_name.as_deref() == Some("b.png") && v.preview_ready)
        .await;
    assert_eq!(view.phase, Phase::Ready);
    assert_eq!(view.file_size, Some(20));
    // A late preview for a.png is dropped without an event.
    assert!(is_nothing_to_download(&h.request_download().await));
    h.shutdown().await;
}

#[tokio::test]
async fn missing_file_leaves_session_untouched() {
    let base = unreachable_base_url().await.expect("reserve port");
    let mut h = Harness::start(&base).await;

    h.send(UiCommand::Select(h.dir.path().join("missing.jpg")));
    match h.next_event().await {
        WorkflowEvent::Info(InfoEvent::LoadFailed { path, reason }) => {
            assert!(path.ends_with("missing.jpg"));
            assert!(reason.contains("missing.jpg"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(is_nothing_to_download(&h.request_download().await));
    h.shutdown().await;
}

#[tokio::test]
async fn download_writes_data_uri_result() {
    let body = r#"{"annotated_image":"data:image/jpeg;base64,AAEC"}"#;
    let (base, _server) = spawn_detection_server(StatusCode::OK, body, None)
        .await
        .expect("spawn server");
    let mut h = Harness::start(&base).await;
    let photo = write_image(h.dir.path(), "photo.jpg", 64);

    h.send(UiCommand::Select(photo));
    h.send(UiCommand::Submit);
    h.wait_for_phase(Phase::Succeeded).await;

    h.send(UiCommand::Download);
    let path = loop {
        if let WorkflowEvent::Info(InfoEvent::ResultSaved { path }) = h.next_event().await {
            break path;
        }
    };
    assert_eq!(path, h.dir.path().join("downloads").join(RESULT_FILENAME));
    assert_eq!(std::fs::read(&path).expect("read result"), vec![0u8, 1, 2]);
    h.shutdown().await;
}

#[tokio::test]
async fn download_fetches_url_result() {
    let body = r#"{"annotated_image":"{base}/annotated.jpg"}"#;
    let (base, _server) = spawn_detection_server(StatusCode::OK, body, None)
        .await
        .expect("spawn server");
    let mut h = Harness::start(&base).await;
    let photo = write_image(h.dir.path(), "photo.jpg", 64);

    h.send(UiCommand::Select(photo));
    h.send(UiCommand::Submit);
    let done = h.wait_for_phase(Phase::Succeeded).await;
    assert_eq!(
        done.result_image.as_deref(),
        Some(format!("{base}/annotated.jpg").as_str())
    );

    h.send(UiCommand::Download);
    let path = loop {
        if let WorkflowEvent::Info(InfoEvent::ResultSaved { path }) = h.next_event().await {
            break path;
        }
    };
    assert_eq!(
        std::fs::read(&path).expect("read result"),
        vec![0xff, 0xd8, 0xff, 0xd9]
    );
    h.shutdown().await;
}

/// Run the `--json`/`--text` path to completion and collect what it would print.
async fn run_headless_cli(args: &[&str]) -> (Result<()>, Vec<OutputLine>) {
    let cli = Cli::parse_from(std::iter::once("hardhat-cli").chain(args.iter().copied()));
    let cfg = build_config(&cli).expect("valid config");
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let res = tokio::time::timeout(Duration::from_secs(10), drive_headless(&cli, cfg, &out_tx))
        .await
        .expect("headless run did not finish");
    drop(out_tx);
    let mut lines = Vec::new();
    while let Some(line) = out_rx.recv().await {
        lines.push(line);
    }
    (res, lines)
}

fn stdout_text(lines: &[OutputLine]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|l| match l {
            OutputLine::Stdout(s) => Some(s.clone()),
            OutputLine::Stderr(_) => None,
        })
        .collect()
}

fn json_report(lines: &[OutputLine]) -> serde_json::Value {
    let out = stdout_text(lines);
    assert_eq!(out.len(), 1, "expected one JSON document, got {out:?}");
    serde_json::from_str(&out[0]).expect("report is JSON")
}

#[tokio::test]
async fn headless_json_reports_timing_of_success() {
    let (base, server) = spawn_detection_server(StatusCode::OK, &success_body(), None)
        .await
        .expect("server");
    let dir = tempfile::tempdir().expect("tempdir");
    let photo = write_image(dir.path(), "photo.jpg", 4096);
    let photo = photo.display().to_string();

    let (res, lines) = run_headless_cli(&["--json", "--base-url", &base, &photo]).await;
    res.expect("analysis succeeds");

    let report = json_report(&lines);
    assert_eq!(report["session"]["phase"], "Succeeded");
    assert_eq!(report["session"]["result_image"], ANNOTATED);
    assert!(report["session"]["error_message"].is_null());
    assert!(report["elapsed_ms"].is_u64(), "elapsed_ms missing: {report}");
    assert!(report["finished_at"].is_string(), "finished_at missing: {report}");
    assert!(report.get("load_error").is_none());
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn headless_text_prints_summary_once() {
    let (base, _server) = spawn_detection_server(StatusCode::OK, &success_body(), None)
        .await
        .expect("server");
    let dir = tempfile::tempdir().expect("tempdir");
    let photo = write_image(dir.path(), "photo.jpg", 2 * 1024 * 1024);
    let photo = photo.display().to_string();

    let (res, lines) = run_headless_cli(&["--text", "--base-url", &base, &photo]).await;
    res.expect("analysis succeeds");

    let analyzing = lines
        .iter()
        .filter(|l| **l == OutputLine::Stderr("Analyzing photo.jpg…".into()))
        .count();
    assert_eq!(analyzing, 1);

    let out = stdout_text(&lines);
    assert_eq!(out[0], format!("Endpoint: {base}/predict"));
    assert_eq!(out[1], "Image: photo.jpg (2.00 MB)");
    assert_eq!(out[2], "Status: Complete");
    assert!(out[3].starts_with("Elapsed: ") && out[3].ends_with(" ms"));
    assert!(out[4].starts_with("Finished: "));
    assert_eq!(out[5], format!("Annotated image: {ANNOTATED}"));
    assert_eq!(out.len(), 6);
}

#[tokio::test]
async fn headless_service_failure_is_an_error() {
    let (base, _server) = spawn_detection_server(StatusCode::INTERNAL_SERVER_ERROR, "oops", None)
        .await
        .expect("server");
    let dir = tempfile::tempdir().expect("tempdir");
    let photo = write_image(dir.path(), "photo.jpg", 64);
    let photo = photo.display().to_string();

    let (res, lines) = run_headless_cli(&["--json", "--base-url", &base, &photo]).await;
    let err = res.expect_err("500 fails the run");
    assert_eq!(err.to_string(), ANALYSIS_FAILED_MESSAGE);

    let report = json_report(&lines);
    assert_eq!(report["session"]["phase"], "Failed");
    assert_eq!(report["session"]["error_message"], ANALYSIS_FAILED_MESSAGE);
    assert!(report["elapsed_ms"].is_u64());
}

#[tokio::test]
async fn headless_unreadable_image_reports_read_error() {
    let (base, server) = spawn_detection_server(StatusCode::OK, &success_body(), None)
        .await
        .expect("server");
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.jpg").display().to_string();

    let (res, lines) = run_headless_cli(&["--json", "--base-url", &base, &missing]).await;
    let err = res.expect_err("missing image fails the run");
    assert!(err.to_string().contains("missing.jpg"), "got {err}");
    assert_ne!(err.to_string(), NO_FILE_MESSAGE);

    let report = json_report(&lines);
    assert!(report["load_error"]
        .as_str()
        .is_some_and(|e| e.contains("missing.jpg")));
    assert_eq!(server.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn headless_download_saves_result_and_keeps_timing() {
    let body = r#"{"annotated_image":"data:image/jpeg;base64,AAEC"}"#;
    let (base, _server) = spawn_detection_server(StatusCode::OK, body, None)
        .await
        .expect("server");
    let dir = tempfile::tempdir().expect("tempdir");
    let photo = write_image(dir.path(), "photo.jpg", 64);
    let photo = photo.display().to_string();
    let out_dir = dir.path().join("out");
    let out_dir_arg = out_dir.display().to_string();

    let (res, lines) = run_headless_cli(&[
        "--json",
        "--download",
        "--download-dir",
        &out_dir_arg,
        "--base-url",
        &base,
        &photo,
    ])
    .await;
    res.expect("analysis and download succeed");

    let report = json_report(&lines);
    let saved = out_dir.join(RESULT_FILENAME);
    assert_eq!(report["saved_to"], saved.display().to_string());
    assert!(report["elapsed_ms"].is_u64());
    assert_eq!(std::fs::read(&saved).expect("saved file"), vec![0u8, 1, 2]);
}

#[tokio::test]
async fn headless_run_returns_once_output_is_written() {
    let (base, _server) = spawn_detection_server(StatusCode::OK, &success_body(), None)
        .await
        .expect("server");
    let dir = tempfile::tempdir().expect("tempdir");
    let photo = write_image(dir.path(), "photo.jpg", 64);
    let cli = Cli::parse_from([
        "hardhat-cli".to_string(),
        "--json".to_string(),
        "--base-url".to_string(),
        base,
        photo.display().to_string(),
    ]);

    tokio::time::timeout(Duration::from_secs(10), crate::cli::run(cli))
        .await
        .expect("headless run hung")
        .expect("analysis succeeds");
}
