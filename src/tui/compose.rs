//! Compose line: text input plus an optional image attachment.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
    Frame,
};
use std::path::PathBuf;

/// What Enter on the compose line asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Submit {
    /// Send the current text and attachment.
    Send {
        text: String,
        image: Option<PathBuf>,
    },
    /// `/attach <path>` or `/detach` was handled locally.
    Handled,
    Nothing,
}

/// State for the compose box.
#[derive(Default)]
pub struct ComposeState {
    /// Current input text.
    pub input: String,
    /// Cursor position (character offset into `input`).
    pub cursor_pos: usize,
    /// Image to send with the next message.
    pub attachment: Option<PathBuf>,
    /// A send is in flight; the draft is kept until it settles.
    pub sending: bool,
}

impl ComposeState {
    /// Insert a character at the current cursor position.
    pub fn insert_char(&mut self, c: char) {
        let byte_pos = self.char_to_byte(self.cursor_pos);
        self.input.insert(byte_pos, c);
        self.cursor_pos += 1;
    }

    /// Delete the character before the cursor (backspace).
    pub fn backspace(&mut self) {
        if self.cursor_pos > 0 {
            let byte_pos = self.char_to_byte(self.cursor_pos);
            let prev_byte_pos = self.char_to_byte(self.cursor_pos - 1);
            self.input.drain(prev_byte_pos..byte_pos);
            self.cursor_pos -= 1;
        }
    }

    /// Delete the character at the cursor (delete key).
    pub fn delete(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor_pos < char_count {
            let byte_pos = self.char_to_byte(self.cursor_pos);
            let next_byte_pos = self.char_to_byte(self.cursor_pos + 1);
            self.input.drain(byte_pos..next_byte_pos);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor_pos = self.cursor_pos.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        if self.cursor_pos < self.input.chars().count() {
            self.cursor_pos += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor_pos = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor_pos = self.input.chars().count();
    }

    /// Clear the text (Ctrl+U). The attachment stays.
    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor_pos = 0;
    }

    /// Empty the draft after a send settled.
    pub fn reset(&mut self) {
        self.clear();
        self.attachment = None;
        self.sending = false;
    }

    /// Interpret Enter.
    ///
    /// Commands are consumed here; a real message is returned but stays in
    /// the box until `reset` is called.
    pub fn submit(&mut self) -> Submit {
        let trimmed = self.input.trim();
        if let Some(path) = trimmed.strip_prefix("/attach ") {
            let path = path.trim();
            if !path.is_empty() {
                self.attachment = Some(PathBuf::from(path));
            }
            self.clear();
            return Submit::Handled;
        }
        if trimmed == "/detach" {
            self.attachment = None;
            self.clear();
            return Submit::Handled;
        }
        if self.sending || (trimmed.is_empty() && self.attachment.is_none()) {
            return Submit::Nothing;
        }
        self.sending = true;
        Submit::Send {
            text: trimmed.to_string(),
            image: self.attachment.clone(),
        }
    }

    /// Convert a char-based cursor position to a byte offset.
    fn char_to_byte(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Height of the compose box: border + attachment line + input line + border.
pub const COMPOSE_HEIGHT: u16 = 4;

pub fn render(area: Rect, frame: &mut Frame, state: &ComposeState, focused: bool) {
    let border_style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let border_type = if focused {
        BorderType::Double
    } else {
        BorderType::Plain
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(border_type)
        .border_style(border_style);

    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let info_area = Rect::new(inner.x, inner.y, inner.width, 1);
    render_info(info_area, frame.buffer_mut(), state);

    if inner.height >= 2 {
        let input_area = Rect::new(inner.x, inner.y + 1, inner.width, 1);
        let cursor = compute_cursor_position(input_area, state, focused);
        render_input(input_area, frame.buffer_mut(), state);
        if let Some((cx, cy)) = cursor {
            frame.set_cursor_position((cx, cy));
        }
    }
}

fn compute_cursor_position(
    input_area: Rect,
    state: &ComposeState,
    focused: bool,
) -> Option<(u16, u16)> {
    if !focused {
        return None;
    }
    if state.input.is_empty() {
        Some((input_area.x + 1, input_area.y))
    } else {
        let display = compose_display_text(&state.input, state.cursor_pos, input_area.width as usize);
        Some((input_area.x + 1 + display.cursor_offset as u16, input_area.y))
    }
}

/// Attachment and send-state line above the input.
fn render_info(area: Rect, buf: &mut Buffer, state: &ComposeState) {
    let mut spans = Vec::new();
    match &state.attachment {
        Some(path) => spans.push(Span::styled(
            format!(" [image] {}  (/detach to remove)", path.display()),
            Style::default().fg(Color::Cyan),
        )),
        None => spans.push(Span::styled(
            " /attach <path> to add an image",
            Style::default().fg(Color::DarkGray),
        )),
    }
    if state.sending {
        spans.push(Span::styled(
            "  sending...",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::ITALIC),
        ));
    }
    Paragraph::new(Line::from(spans)).render(area, buf);
}

fn render_input(area: Rect, buf: &mut Buffer, state: &ComposeState) {
    let w = area.width as usize;

    if state.input.is_empty() {
        let placeholder = " Type a message to support...";
        let truncated: String = placeholder.chars().take(w).collect();
        let line = Line::from(Span::styled(truncated, Style::default().fg(Color::DarkGray)));
        Paragraph::new(line).render(area, buf);
    } else {
        let display = compose_display_text(&state.input, state.cursor_pos, w);
        let line = Line::from(Span::styled(
            format!(" {}", display.visible),
            Style::default().fg(Color::White),
        ));
        Paragraph::new(line).render(area, buf);
    }
}

/// Information about what text to display and where the cursor is.
struct DisplayText {
    visible: String,
    /// The cursor offset within the visible text (in columns).
    cursor_offset: usize,
}

/// Visible slice of the input, scrolled horizontally to keep the cursor in view.
fn compose_display_text(input: &str, cursor_pos: usize, width: usize) -> DisplayText {
    // One column is taken by the leading space.
    let avail = width.saturating_sub(1);
    if avail == 0 {
        return DisplayText {
            visible: String::new(),
            cursor_offset: 0,
        };
    }

    let chars: Vec<char> = input.chars().collect();
    let cursor = cursor_pos.min(chars.len());

    if chars.len() <= avail {
        return DisplayText {
            visible: input.to_string(),
            cursor_offset: cursor,
        };
    }

    let scroll_start = if cursor < avail { 0 } else { cursor - avail + 1 };
    let end = (scroll_start + avail).min(chars.len());
    DisplayText {
        visible: chars[scroll_start..end].iter().collect(),
        cursor_offset: cursor - scroll_start,
    }
}
