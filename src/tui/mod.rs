mod clipboard;
mod help;
mod state;

use crate::cli::Cli;
use crate::download::RESULT_FILENAME;
use crate::model::{format_size, Phase, WorkflowConfig, WorkflowEvent};
use crate::text_summary::abbreviate;
use crate::workflow::{run_controller, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Terminal,
};
use state::{apply_event, handle_key, handle_paste, phase_color, push_wrapped_status_kv};
use state::{KeyOutcome, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::warn;

pub async fn run(args: Cli, cfg: WorkflowConfig) -> Result<()> {
    // Unbounded channels keep the UI thread from ever blocking on the controller.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    if let Some(image) = args.image.clone() {
        let _ = cmd_tx.send(UiCommand::Select(image));
    }

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_state = UiState::new(&cfg);
    let ui_handle = std::thread::spawn(move || run_threaded(ui_state, event_rx, cmd_tx));

    let res = run_controller(cfg, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    mut state: UiState,
    mut event_rx: UnboundedReceiver<WorkflowEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        let mut controller_gone = false;
        loop {
            match event_rx.try_recv() {
                Ok(ev) => apply_event(&mut state, ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    controller_gone = true;
                    break;
                }
            }
        }
        if controller_gone {
            // Startup failure or shutdown; nothing left to drive.
            break Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if !event::poll(Duration::from_millis(10)).unwrap_or(false) {
            continue;
        }
        let outcome = match event::read() {
            Ok(Event::Key(k)) if k.kind == KeyEventKind::Press => handle_key(&mut state, k),
            Ok(Event::Paste(text)) => handle_paste(&mut state, text),
            _ => KeyOutcome::None,
        };
        match outcome {
            KeyOutcome::None => {}
            KeyOutcome::Send(cmd) => {
                let _ = cmd_tx.send(cmd);
            }
            KeyOutcome::CopySavedPath => {
                if let Some(path) = state.last_saved_path.clone() {
                    state.info = match clipboard::copy_saved_path(&path) {
                        Ok(()) => format!(
                            "✓ Copied to clipboard: {}",
                            abbreviate(&path.display().to_string())
                        ),
                        Err(e) => {
                            warn!(error = %e, "clipboard copy failed");
                            format!("Clipboard copy failed: {e:#}")
                        }
                    };
                }
            }
            KeyOutcome::Quit => {
                let _ = cmd_tx.send(UiCommand::Quit);
                break Ok(());
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, DisableBracketedPaste, LeaveAlternateScreen).ok();
    res
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(area);

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "Hard Hat Safety Detection",
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(state.endpoint.clone(), Style::default().fg(Color::DarkGray)),
    ]))
    .block(Block::default().borders(Borders::ALL).title("hardhat-cli"));
    f.render_widget(header, chunks[0]);

    if state.show_help {
        help::draw_help(chunks[1], f);
    } else {
        draw_workflow(chunks[1], f, state);
    }

    let footer_text = match state.path_input.as_deref() {
        Some(input) => Line::from(vec![
            Span::styled("Open: ", Style::default().fg(Color::Magenta)),
            Span::raw(input.to_string()),
            Span::styled("█", Style::default().fg(Color::Gray)),
        ]),
        None => Line::from(state.info.clone()),
    };
    let footer = Paragraph::new(footer_text)
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(footer, chunks[2]);
}

/// "image/png, 1.3 KB encoded" for a `data:` URI.
fn describe_preview(uri: &str) -> String {
    let mime = uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split([';', ',']).next())
        .unwrap_or("unknown");
    format!("{mime}, {} encoded", format_size(uri.len() as u64))
}

fn draw_workflow(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)].as_ref())
        .split(area);

    let view = &state.view;
    let upload_lines = match view.file_name.as_deref() {
        None => vec![
            Line::from(""),
            Line::from(Span::styled(
                "Drop your image here, or press 'o' to browse",
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                "Supports JPG, PNG, and other image formats",
                Style::default().fg(Color::Gray),
            )),
        ],
        Some(name) => {
            let mut lines = vec![Line::from("")];
            push_wrapped_status_kv(&mut lines, "File", name, cols[0].width);
            let size = view.file_size.map(format_size).unwrap_or_else(|| "-".into());
            push_wrapped_status_kv(&mut lines, "Size", &size, cols[0].width);
            let preview = match view.preview.as_deref() {
                Some(uri) => describe_preview(uri),
                None => "building…".to_string(),
            };
            push_wrapped_status_kv(&mut lines, "Preview", &preview, cols[0].width);
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Press 'x' to remove",
                Style::default().fg(Color::DarkGray),
            )));
            lines
        }
    };
    let upload_border = if view.file_name.is_some() {
        Color::Green
    } else {
        Color::Gray
    };
    let upload = Paragraph::new(upload_lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(upload_border))
                .title("Upload"),
        );
    f.render_widget(upload, cols[0]);

    let width = cols[1].width;
    let mut lines = vec![Line::from(vec![
        Span::styled("Phase: ", Style::default().fg(Color::Gray)),
        Span::styled(
            view.phase.label(),
            Style::default()
                .fg(phase_color(view.phase))
                .add_modifier(Modifier::BOLD),
        ),
    ])];
    if let Some(elapsed) = state.last_elapsed {
        push_wrapped_status_kv(
            &mut lines,
            "Elapsed",
            &format!("{} ms", elapsed.as_millis()),
            width,
        );
    }
    lines.push(Line::from(""));

    match view.phase {
        Phase::Idle | Phase::Ready => {
            let hint = if state.can_submit() {
                "Press Enter to analyze for safety compliance"
            } else {
                "Select an image to analyze"
            };
            lines.push(Line::from(Span::styled(hint, Style::default().fg(Color::Cyan))));
        }
        Phase::Submitting => {
            lines.push(Line::from(Span::styled(
                "Analyzing image…",
                Style::default().fg(Color::Yellow),
            )));
        }
        Phase::Succeeded => {
            lines.push(Line::from(Span::styled(
                "Analysis complete",
                Style::default().fg(Color::Green),
            )));
            if let Some(image) = view.result_image.as_deref() {
                push_wrapped_status_kv(&mut lines, "Result", &abbreviate(image), width);
            }
            let target = state.download_dir.join(RESULT_FILENAME);
            push_wrapped_status_kv(
                &mut lines,
                "Download (d)",
                &target.display().to_string(),
                width,
            );
        }
        Phase::Failed => {}
    }
    if let Some(err) = view.error_message.as_deref() {
        lines.push(Line::from(Span::styled(
            err.to_string(),
            Style::default().fg(Color::Red),
        )));
    }

    let status = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Analysis"));
    f.render_widget(status, cols[1]);
}
