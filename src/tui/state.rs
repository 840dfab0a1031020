use crate::model::{describe_elapsed, Phase, SessionView, WorkflowConfig, WorkflowEvent};
use crate::workflow::UiCommand;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::path::PathBuf;
use std::time::Duration;

pub struct UiState {
    pub view: SessionView,
    pub info: String,
    pub endpoint: String,
    pub download_dir: PathBuf,
    pub show_help: bool,
    /// Contents of the browse prompt while it is open.
    pub path_input: Option<String>,
    pub last_saved_path: Option<PathBuf>,
    pub last_elapsed: Option<Duration>,
}

impl UiState {
    pub fn new(cfg: &WorkflowConfig) -> Self {
        Self {
            view: SessionView::default(),
            info: "Drop an image onto the terminal or press 'o' to browse.".into(),
            endpoint: format!("{}{}", cfg.base_url, crate::transfer::PREDICT_PATH),
            download_dir: cfg.download_dir.clone(),
            show_help: false,
            path_input: None,
            last_saved_path: None,
            last_elapsed: None,
        }
    }

    /// Analyze is offered only with a file and no request in flight.
    pub fn can_submit(&self) -> bool {
        self.view.file_name.is_some() && self.view.phase != Phase::Submitting
    }
}

pub fn apply_event(state: &mut UiState, ev: WorkflowEvent) {
    match ev {
        WorkflowEvent::StateChanged(view) => {
            if view.phase == Phase::Idle && state.view.phase != Phase::Idle {
                state.last_elapsed = None;
            }
            if let (Phase::Idle, Some(msg)) = (view.phase, view.error_message.as_deref()) {
                state.info = msg.to_string();
            }
            state.view = view;
        }
        WorkflowEvent::SubmissionSettled {
            applied, elapsed, ..
        } => {
            if applied {
                state.last_elapsed = Some(elapsed);
                state.info = describe_elapsed(elapsed);
            }
        }
        WorkflowEvent::Info(info) => {
            if let crate::model::InfoEvent::ResultSaved { path } = &info {
                state.last_saved_path = Some(path.clone());
            }
            state.info = info.to_message();
        }
    }
}

/// What the input loop should do after a key press.
#[derive(Debug, PartialEq)]
pub enum KeyOutcome {
    None,
    Send(UiCommand),
    CopySavedPath,
    Quit,
}

pub fn handle_key(state: &mut UiState, k: KeyEvent) -> KeyOutcome {
    if let Some(input) = state.path_input.as_mut() {
        match k.code {
            KeyCode::Esc => {
                state.path_input = None;
                state.info = "Browse cancelled".into();
            }
            KeyCode::Enter => {
                let raw = input.trim().to_string();
                state.path_input = None;
                if !raw.is_empty() {
                    return KeyOutcome::Send(UiCommand::Select(expand_home(&raw)));
                }
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(c) if !k.modifiers.contains(KeyModifiers::CONTROL) => input.push(c),
            _ => {}
        }
        return KeyOutcome::None;
    }

    match (k.modifiers, k.code) {
        (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => KeyOutcome::Quit,
        (_, KeyCode::Char('o')) => {
            state.path_input = Some(String::new());
            state.show_help = false;
            KeyOutcome::None
        }
        (_, KeyCode::Enter) | (_, KeyCode::Char('a')) => {
            if state.view.phase == Phase::Submitting {
                state.info = "Analysis already in progress…".into();
                KeyOutcome::None
            } else {
                // Sent even without a file: the controller owns the guard and reports it.
                KeyOutcome::Send(UiCommand::Submit)
            }
        }
        (_, KeyCode::Char('x')) => KeyOutcome::Send(UiCommand::Clear),
        (_, KeyCode::Char('d')) => KeyOutcome::Send(UiCommand::Download),
        (_, KeyCode::Char('y')) => {
            if state.last_saved_path.is_some() {
                KeyOutcome::CopySavedPath
            } else {
                state.info = "No saved result path to copy. Download first (d)".into();
                KeyOutcome::None
            }
        }
        (_, KeyCode::Char('?')) => {
            state.show_help = !state.show_help;
            KeyOutcome::None
        }
        _ => KeyOutcome::None,
    }
}

/// A paste is a drop unless the browse prompt is open, in which case it is typed text.
pub fn handle_paste(state: &mut UiState, text: String) -> KeyOutcome {
    match state.path_input.as_mut() {
        Some(input) => {
            input.push_str(text.trim_end_matches(['\n', '\r']));
            KeyOutcome::None
        }
        None => KeyOutcome::Send(UiCommand::Drop(text)),
    }
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

pub fn phase_color(phase: Phase) -> Color {
    match phase {
        Phase::Idle => Color::Gray,
        Phase::Ready => Color::Cyan,
        Phase::Submitting => Color::Yellow,
        Phase::Succeeded => Color::Green,
        Phase::Failed => Color::Red,
    }
}

pub fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InfoEvent;

    fn state() -> UiState {
        UiState::new(&WorkflowConfig {
            base_url: "http://localhost:8000".into(),
            download_dir: PathBuf::from("/tmp"),
            user_agent: "hardhat-cli/test".into(),
        })
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn browse_prompt_collects_a_path() {
        let mut s = state();
        assert_eq!(handle_key(&mut s, key(KeyCode::Char('o'))), KeyOutcome::None);
        for c in "/tmp/a.jpg".chars() {
            handle_key(&mut s, key(KeyCode::Char(c)));
        }
        assert_eq!(
            handle_key(&mut s, key(KeyCode::Enter)),
            KeyOutcome::Send(UiCommand::Select(PathBuf::from("/tmp/a.jpg")))
        );
        assert!(s.path_input.is_none());
    }

    #[test]
    fn paste_is_a_drop_unless_prompt_is_open() {
        let mut s = state();
        assert_eq!(
            handle_paste(&mut s, "/tmp/a.jpg".into()),
            KeyOutcome::Send(UiCommand::Drop("/tmp/a.jpg".into()))
        );
        s.path_input = Some(String::new());
        assert_eq!(handle_paste(&mut s, "/tmp/b.jpg\n".into()), KeyOutcome::None);
        assert_eq!(s.path_input.as_deref(), Some("/tmp/b.jpg"));
    }

    #[test]
    fn submit_is_disabled_while_analyzing() {
        let mut s = state();
        assert_eq!(
            handle_key(&mut s, key(KeyCode::Enter)),
            KeyOutcome::Send(UiCommand::Submit)
        );
        s.view.phase = Phase::Submitting;
        s.view.file_name = Some("a.jpg".into());
        assert!(!s.can_submit());
        assert_eq!(handle_key(&mut s, key(KeyCode::Char('a'))), KeyOutcome::None);
    }

    #[test]
    fn saved_result_enables_copy() {
        let mut s = state();
        assert_eq!(handle_key(&mut s, key(KeyCode::Char('y'))), KeyOutcome::None);
        apply_event(
            &mut s,
            WorkflowEvent::Info(InfoEvent::ResultSaved {
                path: PathBuf::from("/tmp/safety-analysis-result.jpg"),
            }),
        );
        assert_eq!(
            handle_key(&mut s, key(KeyCode::Char('y'))),
            KeyOutcome::CopySavedPath
        );
    }

    #[test]
    fn no_file_notice_reaches_status_line() {
        let mut s = state();
        apply_event(
            &mut s,
            WorkflowEvent::StateChanged(SessionView {
                error_message: Some("Please select an image first.".into()),
                ..SessionView::default()
            }),
        );
        assert_eq!(s.info, "Please select an image first.");
    }
}
