//! TUI application state and main event loop

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use ratatui::DefaultTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::bell::BellState;
use super::compose::{ComposeState, Submit};
use super::conversation::ConversationState;
use super::ui;
use crate::api::MarketClient;
use crate::channel::websocket::SocketConnector;
use crate::channel::{ConnectionState, EventChannel};
use crate::config::Config;
use crate::panel::{BellCommand, BellEvent, BellPanel, ChatCommand, ChatEvent, ChatOptions, ChatPanel};
use crate::reconcile::Toast;

/// How often connection state and toast expiry are refreshed.
const TICK_MS: u64 = 250;

/// How long a toast stays on the status line.
const TOAST_DURATION: Duration = Duration::from_secs(4);

/// Lines moved per PageUp/PageDown in the conversation.
const SCROLL_STEP: usize = 5;

/// Focused pane
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Pane {
    #[default]
    Compose,
    Bell,
}

/// What a key press asks the panels to do.
#[derive(Debug)]
pub enum Action {
    Chat(ChatCommand),
    Bell(BellCommand),
}

/// Application state
pub struct App {
    pub should_exit: bool,
    pub user_id: String,
    pub connection: ConnectionState,
    pub active_pane: Pane,
    pub conversation: ConversationState,
    pub compose: ComposeState,
    pub bell: BellState,
    pub toast: Option<(Toast, Instant)>,
}

impl App {
    pub fn new(user_id: &str, chat_id: Option<&str>) -> Self {
        Self {
            should_exit: false,
            user_id: user_id.to_string(),
            connection: ConnectionState::Connecting,
            active_pane: Pane::default(),
            conversation: ConversationState {
                header: header_for(chat_id),
                ..Default::default()
            },
            compose: ComposeState::default(),
            bell: BellState {
                loading: true,
                ..Default::default()
            },
            toast: None,
        }
    }

    pub fn show_toast(&mut self, toast: Toast) {
        self.toast = Some((toast, Instant::now()));
    }

    fn expire_toast(&mut self, now: Instant) {
        if self
            .toast
            .as_ref()
            .is_some_and(|(_, shown)| now.duration_since(*shown) >= TOAST_DURATION)
        {
            self.toast = None;
        }
    }

    /// Map a key press to state changes and, possibly, a panel command.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => {
                self.should_exit = true;
                return None;
            }
            KeyCode::Char('c') if ctrl => {
                self.should_exit = true;
                return None;
            }
            KeyCode::Tab => {
                self.active_pane = match self.active_pane {
                    Pane::Compose => Pane::Bell,
                    Pane::Bell => Pane::Compose,
                };
                return None;
            }
            KeyCode::PageUp => {
                self.conversation.scroll_up(SCROLL_STEP);
                return None;
            }
            KeyCode::PageDown => {
                self.conversation.scroll_down(SCROLL_STEP);
                return None;
            }
            _ => {}
        }

        match self.active_pane {
            Pane::Compose => self.handle_compose_key(key.code, ctrl),
            Pane::Bell => self.handle_bell_key(key.code),
        }
    }

    fn handle_compose_key(&mut self, code: KeyCode, ctrl: bool) -> Option<Action> {
        match code {
            KeyCode::Char('u') if ctrl => self.compose.clear(),
            KeyCode::Char('r') if ctrl => return Some(Action::Chat(ChatCommand::Refresh)),
            KeyCode::Char(c) if !ctrl => self.compose.insert_char(c),
            KeyCode::Backspace => self.compose.backspace(),
            KeyCode::Delete => self.compose.delete(),
            KeyCode::Left => self.compose.move_left(),
            KeyCode::Right => self.compose.move_right(),
            KeyCode::Home => self.compose.move_home(),
            KeyCode::End => self.compose.move_end(),
            KeyCode::Enter => {
                if let Submit::Send { text, image } = self.compose.submit() {
                    self.conversation.scroll_back = 0;
                    return Some(Action::Chat(ChatCommand::Send { text, image }));
                }
            }
            _ => {}
        }
        None
    }

    fn handle_bell_key(&mut self, code: KeyCode) -> Option<Action> {
        match code {
            KeyCode::Up | KeyCode::Char('k') => self.bell.select_previous(),
            KeyCode::Down | KeyCode::Char('j') => self.bell.select_next(),
            KeyCode::Char('r') | KeyCode::Enter => {
                return self
                    .bell
                    .selected_id()
                    .map(|id| Action::Bell(BellCommand::MarkAsRead(id)));
            }
            KeyCode::Char('a') => return Some(Action::Bell(BellCommand::MarkAllAsRead)),
            KeyCode::Char('c') => return Some(Action::Bell(BellCommand::ClearAll)),
            _ => {}
        }
        None
    }

    pub fn on_chat_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::View(messages) => self.conversation.set_messages(messages),
            ChatEvent::Alert(toast) => self.show_toast(toast),
            ChatEvent::DraftCleared => self.compose.reset(),
            ChatEvent::HistoryError(text) => self.conversation.error = Some(text),
            ChatEvent::ChatAdopted(chat_id) => {
                self.conversation.header = header_for(Some(&chat_id));
            }
            ChatEvent::Connection(state) => self.connection = state,
        }
    }

    pub fn on_bell_event(&mut self, event: BellEvent) {
        match event {
            BellEvent::Snapshot(snapshot) => self.bell.apply(snapshot),
            BellEvent::Toast(toast) => self.show_toast(toast),
            BellEvent::LoadFailed(text) => self.bell.error = Some(text),
            BellEvent::Connection(state) => self.connection = state,
        }
    }
}

fn header_for(chat_id: Option<&str>) -> String {
    match chat_id {
        Some(id) => format!("Support chat {}", id),
        None => "Support chat (new conversation)".to_string(),
    }
}

/// Run the TUI until the user quits.
///
/// `ratatui::init` installs a panic hook that restores the terminal, so a
/// panic inside the loop does not leave the screen in raw mode.
pub async fn run(config: Config, chat_id: Option<String>) -> Result<()> {
    let identity = config.require_identity()?.clone();

    let client = match MarketClient::new(&config) {
        Ok(c) => Some(Arc::new(c)),
        Err(e) => {
            tracing::warn!("REST API unavailable: {:#}", e);
            None
        }
    };
    let channel = Arc::new(EventChannel::new(Arc::new(SocketConnector::new(
        config.socket_url.clone(),
    ))));

    let mut app = App::new(&identity.user_id, chat_id.as_deref());
    if client.is_none() {
        app.show_toast(Toast::error("Not signed in: history and sending are disabled"));
    }

    let mut bell = BellPanel::mount(
        Arc::clone(&channel),
        client.clone(),
        identity.user_id.clone(),
        config.timing.seen_capacity,
    );
    let mut chat = ChatPanel::mount(
        Arc::clone(&channel),
        client,
        identity,
        ChatOptions::from_config(&config, chat_id),
    );

    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, &mut app, &channel, &mut chat, &mut bell).await;
    ratatui::restore();

    chat.unmount().await;
    bell.unmount().await;
    channel.shutdown();
    result
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    app: &mut App,
    channel: &EventChannel,
    chat: &mut ChatPanel,
    bell: &mut BellPanel,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(Duration::from_millis(TICK_MS));

    while !app.should_exit {
        terminal.draw(|frame| ui::render(frame, app))?;

        tokio::select! {
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => match app.handle_key(key) {
                        Some(Action::Chat(cmd)) => chat.send(cmd),
                        Some(Action::Bell(cmd)) => bell.send(cmd),
                        None => {}
                    },
                    // Resize and other events are picked up by the next draw.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }
            Some(event) = chat.recv() => app.on_chat_event(event),
            Some(event) = bell.recv() => app.on_bell_event(event),
            _ = tick.tick() => {
                app.connection = channel.state();
                app.expire_toast(Instant::now());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::BellSnapshot;
    use crate::reconcile::Tone;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            assert!(app.handle_key(press(KeyCode::Char(c))).is_none());
        }
    }

    #[test]
    fn test_enter_sends_and_draft_clears_on_settle() {
        let mut app = App::new("U1", Some("c1"));
        type_text(&mut app, "hello");
        match app.handle_key(press(KeyCode::Enter)) {
            Some(Action::Chat(ChatCommand::Send { text, image })) => {
                assert_eq!(text, "hello");
                assert!(image.is_none());
            }
            other => panic!("expected send, got {:?}", other),
        }
        assert_eq!(app.compose.input, "hello");

        app.on_chat_event(ChatEvent::DraftCleared);
        assert!(app.compose.input.is_empty());
        assert!(!app.compose.sending);
    }

    #[test]
    fn test_bell_keys_map_to_commands() {
        let mut app = App::new("U1", None);
        app.on_bell_event(BellEvent::Snapshot(BellSnapshot {
            items: crate::models::parse_notifications(
                &serde_json::json!([{"_id": "n1", "message": "a"}, {"_id": "n2", "message": "b"}]),
                chrono::Utc::now(),
            ),
            unread: 2,
            loading: false,
        }));

        app.handle_key(press(KeyCode::Tab));
        assert_eq!(app.active_pane, Pane::Bell);
        app.handle_key(press(KeyCode::Down));
        match app.handle_key(press(KeyCode::Char('r'))) {
            Some(Action::Bell(BellCommand::MarkAsRead(id))) => assert_eq!(id, "n2"),
            other => panic!("expected mark-as-read, got {:?}", other),
        }
        assert!(matches!(
            app.handle_key(press(KeyCode::Char('a'))),
            Some(Action::Bell(BellCommand::MarkAllAsRead))
        ));
        assert!(matches!(
            app.handle_key(press(KeyCode::Char('c'))),
            Some(Action::Bell(BellCommand::ClearAll))
        ));
    }

    #[test]
    fn test_escape_and_ctrl_c_quit() {
        let mut app = App::new("U1", None);
        app.handle_key(press(KeyCode::Esc));
        assert!(app.should_exit);

        let mut app = App::new("U1", None);
        app.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(app.should_exit);
    }

    #[test]
    fn test_toast_expires() {
        let mut app = App::new("U1", None);
        app.on_chat_event(ChatEvent::Alert(Toast::new(Tone::Error, "boom")));
        let shown = app.toast.as_ref().map(|(_, at)| *at).unwrap();
        app.expire_toast(shown + Duration::from_secs(1));
        assert!(app.toast.is_some());
        app.expire_toast(shown + TOAST_DURATION);
        assert!(app.toast.is_none());
    }

    #[test]
    fn test_chat_adopted_updates_header() {
        let mut app = App::new("U1", None);
        assert!(app.conversation.header.contains("new conversation"));
        app.on_chat_event(ChatEvent::ChatAdopted("c42".into()));
        assert_eq!(app.conversation.header, "Support chat c42");
    }
}
