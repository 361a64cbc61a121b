//! Support chat panel: history, live messages and sending

use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, Sleep};
use tokio_stream::{StreamExt, StreamMap};

use super::{fire, Panel};
use crate::api::{create_message, fetch_history, ApiError, CreatedMessage, HistoryPage, MarketClient};
use crate::channel::{names, ConnectionState, EventChannel, Subscription};
use crate::config::{Config, Identity};
use crate::models::{parse_chat_payload, ChatEnvelope, ChatMessage};
use crate::reconcile::{ChatReconciler, ChatSettings, FollowUp, Outgoing, Toast};

#[derive(Debug)]
pub enum ChatCommand {
    Send { text: String, image: Option<PathBuf> },
    /// Reload history for the current conversation.
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The full rendered conversation.
    View(Vec<ChatMessage>),
    Alert(Toast),
    /// A send settled; the compose box can be emptied.
    DraftCleared,
    /// History could not be loaded; the text is user-facing.
    HistoryError(String),
    /// The first send started a conversation with this id.
    ChatAdopted(String),
    Connection(ConnectionState),
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub chat_id: Option<String>,
    pub settings: ChatSettings,
    pub sweep_interval: Duration,
    pub refetch_delay: Duration,
    pub page_size: usize,
    /// Also emit confirmed sends under the legacy event names.
    pub legacy_fanout: bool,
}

impl ChatOptions {
    pub fn from_config(config: &Config, chat_id: Option<String>) -> Self {
        Self {
            chat_id,
            settings: ChatSettings::from(&config.timing),
            sweep_interval: config.timing.sweep_interval(),
            refetch_delay: config.timing.refetch_delay(),
            page_size: config.timing.history_page_size,
            legacy_fanout: config.channel.legacy_fanout,
        }
    }
}

pub type ChatPanel = Panel<ChatCommand, ChatEvent>;

enum Call {
    Connected(anyhow::Result<ConnectionState>),
    History {
        chat_id: String,
        result: Result<HistoryPage, ApiError>,
    },
    Sent {
        outgoing: Outgoing,
        result: Result<CreatedMessage, ApiError>,
    },
}

impl ChatPanel {
    /// Connect, subscribe to the chat events and load history if the
    /// conversation is already known.
    pub fn mount(
        channel: Arc<EventChannel>,
        client: Option<Arc<MarketClient>>,
        identity: Identity,
        options: ChatOptions,
    ) -> Self {
        Panel::spawn(move |cmd_rx, event_tx| {
            ChatTask::new(channel, client, identity, options, event_tx).run(cmd_rx)
        })
    }
}

struct ChatTask {
    reconciler: ChatReconciler,
    channel: Arc<EventChannel>,
    client: Option<Arc<MarketClient>>,
    identity: Identity,
    options: ChatOptions,
    subs: StreamMap<String, Subscription>,
    calls: JoinSet<Call>,
    event_tx: mpsc::UnboundedSender<ChatEvent>,
    self_tested: bool,
    /// A connect call is in flight.
    connecting: bool,
    /// Confirmed messages waiting for the channel to come up.
    held: Vec<ChatMessage>,
}

impl ChatTask {
    fn new(
        channel: Arc<EventChannel>,
        client: Option<Arc<MarketClient>>,
        identity: Identity,
        options: ChatOptions,
        event_tx: mpsc::UnboundedSender<ChatEvent>,
    ) -> Self {
        Self {
            reconciler: ChatReconciler::new(
                identity.user_id.clone(),
                options.chat_id.clone(),
                options.settings,
            ),
            channel,
            client,
            identity,
            options,
            subs: StreamMap::new(),
            calls: JoinSet::new(),
            event_tx,
            self_tested: false,
            connecting: false,
            held: Vec::new(),
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ChatCommand>) {
        self.subscribe();
        {
            let channel = Arc::clone(&self.channel);
            let user_id = self.identity.user_id.clone();
            self.connecting = true;
            self.calls.spawn(async move {
                Call::Connected(channel.connect(&user_id).await.map(|t| t.state()))
            });
        }
        self.load_history();
        self.publish_view();

        let mut sweep = tokio::time::interval(self.options.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refetch: Option<Pin<Box<Sleep>>> = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        ChatCommand::Send { text, image } => self.send(&text, image),
                        ChatCommand::Refresh => self.load_history(),
                    }
                }
                Some((event, payload)) = self.subs.next() => {
                    self.on_live(&event, &payload);
                }
                Some(joined) = self.calls.join_next() => {
                    match joined {
                        Ok(call) => {
                            if let Some(delay) = self.on_call(call) {
                                refetch = Some(Box::pin(tokio::time::sleep(delay)));
                            }
                        }
                        Err(e) => tracing::error!("Chat task failed: {}", e),
                    }
                }
                _ = sweep.tick() => {
                    if self.reconciler.sweep(Utc::now()) {
                        self.publish_view();
                    }
                }
                () = fire(&mut refetch) => {
                    refetch = None;
                    self.load_history();
                }
            }
        }
        tracing::debug!("Chat panel for {} stopped", self.identity.user_id);
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish_view(&self) {
        self.emit(ChatEvent::View(self.reconciler.view()));
    }

    /// Attach listeners for every inbound name not yet subscribed.
    fn subscribe(&mut self) {
        for name in names::chat_inbound(self.reconciler.chat_id()) {
            if !self.subs.contains_key(&name) {
                let sub = self.channel.on(&name);
                self.subs.insert(name, sub);
            }
        }
    }

    fn load_history(&mut self) {
        let (Some(client), Some(chat_id)) = (self.client.clone(), self.reconciler.chat_id()) else {
            return;
        };
        let chat_id = chat_id.to_string();
        let me = self.identity.user_id.clone();
        let limit = self.options.page_size;
        self.calls.spawn(async move {
            let result = fetch_history(&client, &chat_id, &me, 1, limit).await;
            Call::History { chat_id, result }
        });
    }

    fn send(&mut self, text: &str, image: Option<PathBuf>) {
        let Some(outgoing) = self.reconciler.begin_send(text, image, Utc::now()) else {
            return;
        };
        self.publish_view();

        let Some(client) = self.client.clone() else {
            self.settle_failure(&ApiError::Auth("You are not signed in.".to_string()));
            return;
        };
        self.calls.spawn(async move {
            let result = create_message(
                &client,
                outgoing.chat_id.as_deref(),
                &outgoing.text,
                outgoing.image.as_deref(),
            )
            .await;
            Call::Sent { outgoing, result }
        });
    }

    fn settle_failure(&mut self, error: &ApiError) {
        tracing::warn!("Send failed: {}", error);
        let reason = error.reason();
        self.reconciler.fail_send(&reason, Utc::now());
        self.emit(ChatEvent::Alert(Toast::error(reason)));
        self.emit(ChatEvent::DraftCleared);
        self.publish_view();
    }

    fn on_live(&mut self, event: &str, payload: &serde_json::Value) {
        let mut messages = parse_chat_payload(payload, &self.identity.user_id, Utc::now());
        // Scoped legacy names carry the conversation in the name itself.
        if let Some((_, scope)) = event.split_once("::") {
            for msg in &mut messages {
                msg.chat_id.get_or_insert_with(|| scope.to_string());
            }
        }
        if self.reconciler.ingest_live(messages) {
            self.publish_view();
        }
    }

    /// Apply a finished call. Returns a delay when history should be
    /// re-read later.
    fn on_call(&mut self, call: Call) -> Option<Duration> {
        match call {
            Call::Connected(Ok(state)) => {
                self.connecting = false;
                self.emit(ChatEvent::Connection(state));
                self.self_test();
                for msg in std::mem::take(&mut self.held) {
                    self.push_upstream(&msg);
                }
            }
            Call::Connected(Err(e)) => {
                self.connecting = false;
                tracing::warn!("Live chat unavailable, history only: {:#}", e);
                if !self.held.is_empty() {
                    tracing::warn!("{} sent message(s) not pushed live", self.held.len());
                    self.held.clear();
                }
                self.emit(ChatEvent::Connection(ConnectionState::Disconnected));
            }
            Call::History { chat_id, result } => match result {
                Ok(page) if self.reconciler.chat_id() == Some(chat_id.as_str()) => {
                    self.reconciler.replace_history(page.messages);
                    self.publish_view();
                }
                Ok(_) => tracing::debug!("Ignoring history for stale chat {}", chat_id),
                Err(e) => {
                    tracing::warn!("History fetch failed: {:#}", e);
                    self.emit(ChatEvent::HistoryError(e.load_failure("messages")));
                }
            },
            Call::Sent { outgoing, result } => match result {
                Ok(created) => {
                    let outcome = self.reconciler.confirm_send(&outgoing, created, Utc::now());
                    if let Some(ref msg) = outcome.confirmed {
                        self.broadcast(msg);
                    }
                    let mut delay = None;
                    match outcome.follow_up {
                        FollowUp::LoadHistory(chat_id) => {
                            self.subscribe();
                            self.emit(ChatEvent::ChatAdopted(chat_id));
                            self.load_history();
                        }
                        FollowUp::Refetch => delay = Some(self.options.refetch_delay),
                        FollowUp::Nothing => {}
                    }
                    self.emit(ChatEvent::DraftCleared);
                    self.publish_view();
                    return delay;
                }
                Err(e) => self.settle_failure(&e),
            },
        }
        None
    }

    /// One diagnostic event per mount, so the server can confirm the route.
    fn self_test(&mut self) {
        if self.self_tested {
            return;
        }
        self.self_tested = true;
        let payload = json!({
            "userId": self.identity.user_id,
            "role": self.identity.role,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self.channel.emit(names::CONNECTION_TEST, &payload) {
            tracing::debug!("Connection self-test not sent: {:#}", e);
        }
    }

    /// Push a confirmed message to other subscribers of the conversation,
    /// or hold it until the pending connect settles.
    fn broadcast(&mut self, msg: &ChatMessage) {
        if self.connecting && self.channel.get().is_none() {
            tracing::debug!("Holding message {} until the channel is up", msg.id);
            self.held.push(msg.clone());
            return;
        }
        self.push_upstream(msg);
    }

    fn push_upstream(&self, msg: &ChatMessage) {
        let Some(chat_id) = msg.chat_id.as_deref() else {
            return;
        };
        match serde_json::to_value(ChatEnvelope::new(chat_id, msg)) {
            Ok(envelope) => {
                if let Err(e) = self.channel.emit(names::CHAT_MESSAGE, &envelope) {
                    tracing::warn!("Chat message not pushed: {:#}", e);
                }
            }
            Err(e) => tracing::warn!("Cannot encode chat message {}: {}", msg.id, e),
        }

        if !self.options.legacy_fanout {
            return;
        }
        let Ok(payload) = serde_json::to_value(msg) else {
            return;
        };
        for name in names::chat_legacy_outbound(chat_id) {
            if let Err(e) = self.channel.emit(&name, &payload) {
                tracing::debug!("Legacy push on {} failed: {:#}", name, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::FakeConnector;
    use crate::models::{Author, MessageKind};
    use crate::reconcile::Tone;

    fn identity() -> Identity {
        Identity {
            user_id: "U1".into(),
            role: "user".into(),
        }
    }

    async fn recv(panel: &mut ChatPanel) -> ChatEvent {
        tokio::time::timeout(Duration::from_secs(1), panel.recv())
            .await
            .expect("timed out waiting for chat event")
            .expect("chat panel stopped")
    }

    /// Next event other than a connection update.
    async fn next(panel: &mut ChatPanel) -> ChatEvent {
        loop {
            match recv(panel).await {
                ChatEvent::Connection(_) => continue,
                other => return other,
            }
        }
    }

    async fn next_view(panel: &mut ChatPanel) -> Vec<ChatMessage> {
        loop {
            if let ChatEvent::View(view) = next(panel).await {
                return view;
            }
        }
    }

    async fn mounted(chat_id: Option<&str>) -> (Arc<FakeConnector>, Arc<EventChannel>, ChatPanel) {
        let connector = Arc::new(FakeConnector::default());
        let channel = Arc::new(EventChannel::new(connector.clone()));
        channel.connect("U1").await.unwrap();
        let options = ChatOptions::from_config(&Config::default(), chat_id.map(String::from));
        let mut panel = ChatPanel::mount(Arc::clone(&channel), None, identity(), options);
        let first = next_view(&mut panel).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, MessageKind::Greeting);
        (connector, channel, panel)
    }

    #[tokio::test]
    async fn test_live_message_for_current_chat_renders() {
        let (connector, _channel, mut panel) = mounted(Some("c1")).await;

        connector.push(
            names::CHAT_MESSAGE,
            json!({"kind": "chat-message", "chatId": "c2",
                   "message": {"_id": "x", "sender": "S", "message": "elsewhere"}}),
        );
        connector.push(
            names::CHAT_MESSAGE,
            json!({"kind": "chat-message", "chatId": "c1",
                   "message": {"_id": "m1", "sender": {"_id": "S"}, "message": "Hi there"}}),
        );

        let view = next_view(&mut panel).await;
        assert_eq!(view.len(), 2);
        assert_eq!(view[1].id, "m1");
        assert_eq!(view[1].author, Author::Peer);
    }

    #[tokio::test]
    async fn test_scoped_legacy_event_takes_chat_from_name() {
        let (connector, _channel, mut panel) = mounted(Some("c1")).await;

        connector.push(
            "support-message::c1",
            json!({"_id": "m2", "sender": "U1", "text": "from my other tab"}),
        );
        let view = next_view(&mut panel).await;
        assert_eq!(view[1].id, "m2");
        assert_eq!(view[1].author, Author::Me);
    }

    #[tokio::test]
    async fn test_self_test_emitted_on_connect() {
        let (connector, _channel, mut panel) = mounted(None).await;
        loop {
            if let ChatEvent::Connection(state) = recv(&mut panel).await {
                assert_eq!(state, ConnectionState::Connected);
                break;
            }
        }
        let sent = connector.last().unwrap().sent();
        let tests: Vec<_> = sent.iter().filter(|(name, _)| name == names::CONNECTION_TEST).collect();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].1["userId"], "U1");
    }

    #[tokio::test]
    async fn test_send_without_client_reports_failure() {
        let (_connector, _channel, mut panel) = mounted(Some("c1")).await;

        panel.send(ChatCommand::Send {
            text: "hello".into(),
            image: None,
        });
        let view = next_view(&mut panel).await;
        assert_eq!(view.len(), 2);
        assert!(view[1].is_temporary);

        match next(&mut panel).await {
            ChatEvent::Alert(toast) => {
                assert_eq!(toast.tone, Tone::Error);
                assert_eq!(toast.text, "You are not signed in.");
            }
            other => panic!("expected alert, got {:?}", other),
        }
        assert_eq!(next(&mut panel).await, ChatEvent::DraftCleared);

        let view = next_view(&mut panel).await;
        assert_eq!(view.len(), 3);
        assert_eq!(view[2].kind, MessageKind::System);
        assert_eq!(view[2].text.as_deref(), Some("You are not signed in."));
    }

    #[tokio::test]
    async fn test_unmount_detaches_listeners() {
        let (_connector, channel, panel) = mounted(Some("c1")).await;
        assert_eq!(channel.listener_count(names::CHAT_MESSAGE), 1);
        assert_eq!(channel.listener_count("support-message::c1"), 1);

        panel.unmount().await;
        assert_eq!(channel.listener_count(names::CHAT_MESSAGE), 0);
        assert_eq!(channel.listener_count("support-message::c1"), 0);
    }

    fn task(
        channel: Arc<EventChannel>,
        chat_id: Option<&str>,
        legacy_fanout: bool,
    ) -> (ChatTask, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut options = ChatOptions::from_config(&Config::default(), chat_id.map(String::from));
        options.legacy_fanout = legacy_fanout;
        (ChatTask::new(channel, None, identity(), options, tx), rx)
    }

    /// Settle a send of `text` as if the API accepted it into `chat_id`.
    fn settle_sent(task: &mut ChatTask, text: &str, chat_id: &str, id: &str) -> Option<Duration> {
        let outgoing = task.reconciler.begin_send(text, None, Utc::now()).unwrap();
        let created = CreatedMessage {
            id: Some(id.into()),
            chat_id: Some(chat_id.into()),
            image: None,
            created_at: Some(Utc::now()),
        };
        task.on_call(Call::Sent {
            outgoing,
            result: Ok(created),
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn connected() -> (Arc<FakeConnector>, Arc<EventChannel>) {
        let connector = Arc::new(FakeConnector::default());
        let channel = Arc::new(EventChannel::new(connector.clone()));
        channel.connect("U1").await.unwrap();
        (connector, channel)
    }

    #[tokio::test]
    async fn test_confirmed_send_pushes_envelope_and_schedules_refetch() {
        let (connector, channel) = connected().await;
        let (mut task, mut rx) = task(channel, Some("c1"), false);

        let delay = settle_sent(&mut task, "hello", "c1", "m1");
        assert_eq!(delay, Some(task.options.refetch_delay));

        let events = drain(&mut rx);
        assert!(events.contains(&ChatEvent::DraftCleared));
        assert!(!events.iter().any(|e| matches!(e, ChatEvent::Alert(_))));
        match events.last() {
            Some(ChatEvent::View(view)) => {
                let mine: Vec<_> = view.iter().filter(|m| m.kind == MessageKind::Message).collect();
                assert_eq!(mine.len(), 1);
                assert_eq!(mine[0].id, "m1");
            }
            other => panic!("expected view, got {:?}", other),
        }

        let sent = connector.last().unwrap().sent();
        assert_eq!(sent.len(), 1);
        let (name, payload) = &sent[0];
        assert_eq!(name, names::CHAT_MESSAGE);
        assert_eq!(payload["kind"], "chat-message");
        assert_eq!(payload["chatId"], "c1");
        assert_eq!(payload["message"]["_id"], "m1");
        assert_eq!(payload["message"]["message"], "hello");
    }

    #[tokio::test]
    async fn test_legacy_fanout_emits_every_legacy_name() {
        let (connector, channel) = connected().await;
        let (mut task, _rx) = task(channel, Some("c1"), true);

        settle_sent(&mut task, "hello", "c1", "m1");

        let sent: Vec<String> = connector
            .last()
            .unwrap()
            .sent()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let mut expected = vec![names::CHAT_MESSAGE.to_string()];
        expected.extend(names::chat_legacy_outbound("c1"));
        assert_eq!(sent, expected);
        assert_eq!(sent.len(), 6);
    }

    #[tokio::test]
    async fn test_first_send_adopts_chat_and_subscribes_scoped_names() {
        let (_connector, channel) = connected().await;
        let (mut task, mut rx) = task(Arc::clone(&channel), None, false);
        task.subscribe();
        assert_eq!(channel.listener_count("support-message::c9"), 0);

        let delay = settle_sent(&mut task, "hi", "c9", "m1");
        assert_eq!(delay, None);
        assert_eq!(task.reconciler.chat_id(), Some("c9"));
        assert_eq!(channel.listener_count("support-message::c9"), 1);
        assert_eq!(channel.listener_count("new-support-message::c9"), 1);
        assert_eq!(channel.listener_count(names::CHAT_MESSAGE), 1);

        let events = drain(&mut rx);
        let adopted = events
            .iter()
            .position(|e| *e == ChatEvent::ChatAdopted("c9".into()))
            .expect("chat adopted");
        let cleared = events
            .iter()
            .position(|e| *e == ChatEvent::DraftCleared)
            .expect("draft cleared");
        assert!(adopted < cleared);
    }

    #[tokio::test]
    async fn test_send_confirmed_before_connect_is_pushed_once_connected() {
        let connector = Arc::new(FakeConnector::default());
        let channel = Arc::new(EventChannel::new(connector.clone()));
        let (mut task, _rx) = task(Arc::clone(&channel), Some("c1"), false);
        task.connecting = true;

        settle_sent(&mut task, "early", "c1", "m1");
        assert!(connector.last().is_none());

        channel.connect("U1").await.unwrap();
        task.on_call(Call::Connected(Ok(ConnectionState::Connected)));

        let sent = connector.last().unwrap().sent();
        let pushed: Vec<_> = sent.iter().filter(|(name, _)| name == names::CHAT_MESSAGE).collect();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1["message"]["_id"], "m1");

        // Held messages go out once.
        task.on_call(Call::Connected(Ok(ConnectionState::Connected)));
        let again = connector.last().unwrap().sent();
        assert_eq!(again.iter().filter(|(name, _)| name == names::CHAT_MESSAGE).count(), 1);
    }
}
