//! UI rendering for the TUI

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
    Frame,
};

use super::app::{App, Pane};
use super::bell;
use super::compose;
use super::conversation;
use crate::channel::ConnectionState;
use crate::reconcile::Tone;

/// Status indicator symbol and color for the connection state
fn status_indicator(state: ConnectionState) -> (&'static str, Color) {
    match state {
        ConnectionState::Connected => ("*", Color::Green),
        ConnectionState::Connecting => ("~", Color::Yellow),
        ConnectionState::Disconnected => ("o", Color::Red),
    }
}

fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Success => Color::Green,
        Tone::Error => Color::Red,
        Tone::Info => Color::Cyan,
        Tone::Neutral => Color::White,
    }
}

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Layout: header (1 line) + main content + status bar (1 line)
    let [header_area, main_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(header_area, frame.buffer_mut(), app);

    let bell_open = app.active_pane == Pane::Bell;
    let [content_area, bell_area] = Layout::horizontal([
        Constraint::Fill(1),
        Constraint::Length(if bell_open { bell::BELL_WIDTH } else { 0 }),
    ])
    .areas(main_area);

    // Split content area: conversation (fill) + compose box
    let [conversation_area, compose_area] = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(compose::COMPOSE_HEIGHT),
    ])
    .areas(content_area);

    conversation::render(conversation_area, frame.buffer_mut(), &app.conversation);
    compose::render(
        compose_area,
        frame,
        &app.compose,
        app.active_pane == Pane::Compose,
    );
    if bell_open {
        bell::render(bell_area, frame.buffer_mut(), &app.bell);
    }

    render_status(status_area, frame.buffer_mut(), app);
}

/// Render the header bar: title on the left, bell badge, connection and user
/// on the right.
fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let title = " market-live";
    let bell = if app.bell.unread > 0 {
        format!(" [bell {}] ", app.bell.unread)
    } else {
        " [bell] ".to_string()
    };
    let (symbol, color) = status_indicator(app.connection);
    let connection = format!(" {} {} ", symbol, app.connection.as_str());
    let user = format!(" {} ", app.user_id);

    let used = title.len() + bell.len() + connection.len() + user.len();
    let padding = " ".repeat((area.width as usize).saturating_sub(used));

    let bell_style = if app.bell.unread > 0 {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };

    let line = Line::from(vec![
        Span::styled(
            title,
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(padding),
        Span::styled(bell, bell_style),
        Span::styled(connection, Style::default().fg(color)),
        Span::styled(user, Style::default().fg(Color::Cyan)),
    ]);

    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Render the status bar: the current toast, else key hints.
fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    if let Some((ref toast, _)) = app.toast {
        let style = Style::default().fg(tone_color(toast.tone)).bg(Color::DarkGray);
        let line = Line::from(Span::styled(
            format!(" {}: {} ", toast.tone.label(), toast.text),
            style,
        ));
        Paragraph::new(line)
            .style(Style::default().bg(Color::DarkGray))
            .render(area, buf);
        return;
    }

    let hints = match app.active_pane {
        Pane::Compose => " Enter: send | Tab: notifications | PgUp/PgDn: scroll | C-r: refresh | Esc: quit",
        Pane::Bell => " Up/Down: select | r: read | a: read all | c: clear | Tab: back | Esc: quit",
    };
    Paragraph::new(Line::from(Span::styled(
        hints,
        Style::default().fg(Color::Gray),
    )))
    .style(Style::default().bg(Color::DarkGray))
    .render(area, buf);
}
