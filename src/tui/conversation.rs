//! Conversation pane: the merged support chat, newest at the bottom.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};

use crate::models::{Author, ChatMessage, MessageKind};

/// State for the conversation pane.
#[derive(Default)]
pub struct ConversationState {
    /// Header text (conversation id or "new conversation").
    pub header: String,
    pub messages: Vec<ChatMessage>,
    /// Lines scrolled up from the bottom (0 = follow newest).
    pub scroll_back: usize,
    /// Inline error shown instead of history (e.g. failed load).
    pub error: Option<String>,
}

impl ConversationState {
    pub fn set_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.error = None;
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_back = self.scroll_back.saturating_add(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_back = self.scroll_back.saturating_sub(lines);
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn render(area: Rect, buf: &mut Buffer, state: &ConversationState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Plain)
        .border_style(Style::default().fg(Color::DarkGray));

    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let header_area = Rect::new(inner.x, inner.y, inner.width, 1);
    render_header(header_area, buf, &state.header);

    let body = Rect::new(
        inner.x,
        inner.y + 1,
        inner.width,
        inner.height.saturating_sub(1),
    );
    if body.height == 0 {
        return;
    }

    let mut lines = build_lines(&state.messages, body.width as usize);
    if let Some(ref error) = state.error {
        lines.push(Line::from(Span::styled(
            format!(" {}", error),
            Style::default().fg(Color::Red),
        )));
    }

    let visible = body.height as usize;
    let total = lines.len();
    let max_back = total.saturating_sub(visible);
    let back = state.scroll_back.min(max_back);
    let start = total.saturating_sub(visible + back);

    for (row, line) in lines.iter().skip(start).take(visible).enumerate() {
        let line_area = Rect::new(body.x, body.y + row as u16, body.width, 1);
        Paragraph::new(line.clone()).render(line_area, buf);
    }

    if total > visible {
        let x = body.x + body.width.saturating_sub(1);
        if start > 0 {
            let cell = &mut buf[(x, body.y)];
            cell.set_char('^');
            cell.set_style(Style::default().fg(Color::DarkGray));
        }
        if back > 0 {
            let cell = &mut buf[(x, body.y + body.height.saturating_sub(1))];
            cell.set_char('v');
            cell.set_style(Style::default().fg(Color::DarkGray));
        }
    }
}

fn render_header(area: Rect, buf: &mut Buffer, header: &str) {
    let line = Line::from(vec![Span::styled(
        format!(" {} ", header),
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    )]);
    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

fn sender_label(msg: &ChatMessage) -> (&'static str, Style) {
    match (msg.kind, msg.author) {
        (MessageKind::Greeting, _) => ("Support", Style::default().fg(Color::Cyan)),
        (MessageKind::System, _) => ("System", Style::default().fg(Color::Red)),
        (_, Author::Me) => ("You", Style::default().fg(Color::Green)),
        (_, Author::Peer) => ("Support", Style::default().fg(Color::Cyan)),
    }
}

/// Flatten messages into display lines: a sender line, wrapped text, an
/// optional image line and a blank separator.
fn build_lines(messages: &[ChatMessage], width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let content_width = width.saturating_sub(3);

    for msg in messages {
        let (label, style) = sender_label(msg);
        let mut header = vec![Span::styled(
            format!(" {}", label),
            style.add_modifier(Modifier::BOLD),
        )];
        if msg.kind != MessageKind::Greeting {
            header.push(Span::styled(
                format!(
                    "  {}",
                    msg.created_at.with_timezone(&chrono::Local).format("%H:%M")
                ),
                Style::default().fg(Color::DarkGray),
            ));
        }
        if msg.is_temporary {
            header.push(Span::styled(
                "  sending...",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::ITALIC),
            ));
        }
        lines.push(Line::from(header));

        let text_style = if msg.kind == MessageKind::System {
            Style::default().fg(Color::Red)
        } else if msg.is_temporary {
            Style::default().fg(Color::Gray)
        } else {
            Style::default().fg(Color::White)
        };
        for chunk in wrap_text(msg.text.as_deref().unwrap_or(""), content_width) {
            lines.push(Line::from(Span::styled(format!("   {}", chunk), text_style)));
        }
        if let Some(ref image) = msg.image {
            lines.push(Line::from(Span::styled(
                format!("   [image] {}", image),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::DIM),
            )));
        }
        lines.push(Line::from(""));
    }
    lines
}

/// Simple word-wrapping: split content by newlines first, then wrap long lines.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return vec![];
    }
    let mut result = Vec::new();
    for line in text.lines() {
        if line.chars().count() <= max_width {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if current.is_empty() {
                current = word.to_string();
            } else if current.chars().count() + 1 + word.chars().count() <= max_width {
                current.push(' ');
                current.push_str(word);
            } else {
                result.push(std::mem::take(&mut current));
                current = word.to_string();
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}
