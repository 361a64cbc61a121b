//! Notification bell pane: newest first, unread entries marked.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
};

use crate::models::{NotificationEvent, NotificationKind};
use crate::panel::BellSnapshot;

/// Width of the bell pane when it is shown.
pub const BELL_WIDTH: u16 = 40;

#[derive(Default)]
pub struct BellState {
    pub items: Vec<NotificationEvent>,
    pub unread: usize,
    pub loading: bool,
    pub error: Option<String>,
    pub selected: usize,
}

impl BellState {
    pub fn apply(&mut self, snapshot: BellSnapshot) {
        self.items = snapshot.items;
        self.unread = snapshot.unread;
        self.loading = snapshot.loading;
        if self.selected >= self.items.len() {
            self.selected = self.items.len().saturating_sub(1);
        }
    }

    pub fn select_previous(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self) {
        if self.selected + 1 < self.items.len() {
            self.selected += 1;
        }
    }

    /// Id of the highlighted entry, if it has one.
    pub fn selected_id(&self) -> Option<String> {
        self.items.get(self.selected).and_then(|n| n.id.clone())
    }
}

fn kind_color(kind: &NotificationKind) -> Color {
    match kind {
        NotificationKind::Success => Color::Green,
        NotificationKind::Error => Color::Red,
        NotificationKind::Warning => Color::Yellow,
        NotificationKind::Info | NotificationKind::Other(_) => Color::Cyan,
    }
}

/// Rendered only while the pane has focus.
pub fn render(area: Rect, buf: &mut Buffer, state: &BellState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Double)
        .border_style(Style::default().fg(Color::Yellow))
        .title(format!(" Notifications ({}) ", state.unread));

    let inner = block.inner(area);
    block.render(area, buf);
    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let mut lines: Vec<Line> = Vec::new();
    if let Some(ref error) = state.error {
        lines.push(Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        )));
    }
    if state.loading {
        lines.push(Line::from(Span::styled(
            "Loading...",
            Style::default().fg(Color::DarkGray),
        )));
    } else if state.items.is_empty() {
        lines.push(Line::from(Span::styled(
            "No notifications",
            Style::default().fg(Color::DarkGray),
        )));
    }

    let width = inner.width as usize;
    for (idx, item) in state.items.iter().enumerate() {
        let marker = if item.is_read { "  " } else { "* " };
        let mut style = Style::default().fg(kind_color(&item.kind));
        if !item.is_read {
            style = style.add_modifier(Modifier::BOLD);
        }
        if idx == state.selected {
            style = style.bg(Color::DarkGray);
        }
        let text: String = format!(
            "{}{} {}",
            marker,
            item.created_at.with_timezone(&chrono::Local).format("%m-%d %H:%M"),
            item.message
        )
        .chars()
        .take(width)
        .collect();
        lines.push(Line::from(Span::styled(text, style)));
    }

    // Keep the selection in view.
    let visible = inner.height as usize;
    let offset = (lines.len() - state.items.len()) + state.selected;
    let skip = (offset + 1).saturating_sub(visible);
    for (row, line) in lines.into_iter().skip(skip).take(visible).enumerate() {
        Paragraph::new(line).render(Rect::new(inner.x, inner.y + row as u16, inner.width, 1), buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(id: &str) -> NotificationEvent {
        NotificationEvent {
            id: Some(id.into()),
            user_id: None,
            kind: NotificationKind::Info,
            message: id.into(),
            is_read: false,
            created_at: Utc::now(),
            stamped: true,
        }
    }

    #[test]
    fn test_selection_clamped_when_list_shrinks() {
        let mut state = BellState::default();
        state.apply(BellSnapshot {
            items: vec![item("a"), item("b"), item("c")],
            unread: 3,
            loading: false,
        });
        state.select_next();
        state.select_next();
        state.select_next();
        assert_eq!(state.selected_id().as_deref(), Some("c"));

        state.apply(BellSnapshot {
            items: vec![item("a")],
            unread: 1,
            loading: false,
        });
        assert_eq!(state.selected_id().as_deref(), Some("a"));

        state.apply(BellSnapshot {
            items: vec![],
            unread: 0,
            loading: false,
        });
        assert_eq!(state.selected_id(), None);
    }
}
