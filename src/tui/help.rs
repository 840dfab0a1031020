use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn keybind(key: &'static str, pad: usize, label: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(label),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        keybind("o", 11, "Browse for an image (type a path, Enter to select)"),
        keybind("Enter/a", 5, "Analyze the selected image"),
        keybind("x", 11, "Reset (clear selection and result)"),
        keybind("d", 11, "Download result as safety-analysis-result.jpg"),
        keybind("y", 11, "Copy downloaded path to clipboard"),
        keybind("?", 11, "Toggle this help"),
        Line::from(""),
        Line::from("Drag and drop:"),
        Line::from("  Drop an image file onto the terminal window to select it."),
        Line::from("  Dropped text that is not a file is ignored."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
