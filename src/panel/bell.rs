//! Notification bell: live notifications for the signed-in user

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::{StreamExt, StreamMap};

use super::Panel;
use crate::api::{fetch_notifications, ApiError, MarketClient};
use crate::channel::{names, ConnectionState, EventChannel, Subscription};
use crate::models::{parse_notifications, NotificationEvent};
use crate::reconcile::{NotificationReconciler, Phase, Toast};

#[derive(Debug)]
pub enum BellCommand {
    MarkAsRead(String),
    MarkAllAsRead,
    ClearAll,
}

/// What the bell currently shows.
#[derive(Debug, Clone, PartialEq)]
pub struct BellSnapshot {
    pub items: Vec<NotificationEvent>,
    pub unread: usize,
    pub loading: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BellEvent {
    Snapshot(BellSnapshot),
    Toast(Toast),
    /// The initial list could not be loaded; the text is user-facing.
    LoadFailed(String),
    Connection(ConnectionState),
}

pub type BellPanel = Panel<BellCommand, BellEvent>;

enum Call {
    Connected(anyhow::Result<ConnectionState>),
    Loaded(Result<Vec<NotificationEvent>, ApiError>),
}

impl BellPanel {
    /// Connect, subscribe to both notification channels and load the list.
    ///
    /// Without a client the list starts empty and only live events show up.
    pub fn mount(
        channel: Arc<EventChannel>,
        client: Option<Arc<MarketClient>>,
        user_id: impl Into<String>,
        seen_capacity: usize,
    ) -> Self {
        let user_id = user_id.into();
        Panel::spawn(move |cmd_rx, event_tx| {
            run(channel, client, user_id, seen_capacity, cmd_rx, event_tx)
        })
    }
}

fn snapshot(reconciler: &NotificationReconciler) -> BellEvent {
    BellEvent::Snapshot(BellSnapshot {
        items: reconciler.items().to_vec(),
        unread: reconciler.unread_count(),
        loading: reconciler.phase() == Phase::Loading,
    })
}

fn publish(event_tx: &mpsc::UnboundedSender<BellEvent>, toasts: Vec<Toast>, state: BellEvent) {
    for toast in toasts {
        let _ = event_tx.send(BellEvent::Toast(toast));
    }
    let _ = event_tx.send(state);
}

async fn run(
    channel: Arc<EventChannel>,
    client: Option<Arc<MarketClient>>,
    user_id: String,
    seen_capacity: usize,
    mut cmd_rx: mpsc::UnboundedReceiver<BellCommand>,
    event_tx: mpsc::UnboundedSender<BellEvent>,
) {
    let mut reconciler = NotificationReconciler::new(&user_id, seen_capacity);

    // Subscribe before anything is fetched so nothing pushed in between is lost.
    let mut subs: StreamMap<String, Subscription> = StreamMap::new();
    for name in [names::notification_for(&user_id), names::NOTIFICATION.to_string()] {
        let sub = channel.on(&name);
        subs.insert(name, sub);
    }

    let mut calls = JoinSet::new();
    {
        let channel = Arc::clone(&channel);
        let user_id = user_id.clone();
        calls.spawn(async move {
            Call::Connected(channel.connect(&user_id).await.map(|t| t.state()))
        });
    }
    match client {
        Some(client) => {
            calls.spawn(async move { Call::Loaded(fetch_notifications(&client).await) });
        }
        None => {
            tracing::debug!("No API client; notification list starts empty");
            reconciler.finish_loading(Vec::new());
        }
    }
    let _ = event_tx.send(snapshot(&reconciler));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    BellCommand::MarkAsRead(id) => {
                        if !reconciler.mark_as_read(&id) {
                            continue;
                        }
                    }
                    BellCommand::MarkAllAsRead => reconciler.mark_all_as_read(),
                    BellCommand::ClearAll => reconciler.clear_all(),
                }
                let _ = event_tx.send(snapshot(&reconciler));
            }
            Some((event, payload)) = subs.next() => {
                let batch = parse_notifications(&payload, Utc::now());
                tracing::debug!("{} notification(s) on {}", batch.len(), event);
                if batch.is_empty() {
                    continue;
                }
                // Every accepted event yields a toast; none means nothing changed.
                let toasts = reconciler.ingest(batch);
                if !toasts.is_empty() {
                    publish(&event_tx, toasts, snapshot(&reconciler));
                }
            }
            Some(joined) = calls.join_next() => {
                let call = match joined {
                    Ok(call) => call,
                    Err(e) => {
                        tracing::error!("Notification task failed: {}", e);
                        continue;
                    }
                };
                match call {
                    Call::Connected(Ok(state)) => {
                        let _ = event_tx.send(BellEvent::Connection(state));
                    }
                    Call::Connected(Err(e)) => {
                        tracing::warn!("Live notifications unavailable: {:#}", e);
                        let _ = event_tx.send(BellEvent::Connection(ConnectionState::Disconnected));
                    }
                    Call::Loaded(result) => {
                        let initial = match result {
                            Ok(list) => list,
                            Err(e) => {
                                tracing::warn!("Notification fetch failed: {:#}", e);
                                let _ = event_tx.send(BellEvent::LoadFailed(e.load_failure("notifications")));
                                Vec::new()
                            }
                        };
                        let toasts = reconciler.finish_loading(initial);
                        publish(&event_tx, toasts, snapshot(&reconciler));
                    }
                }
            }
        }
    }
    tracing::debug!("Bell panel for {} stopped", user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::FakeConnector;
    use crate::reconcile::Tone;
    use serde_json::json;
    use std::time::Duration;

    async fn recv(panel: &mut BellPanel) -> BellEvent {
        tokio::time::timeout(Duration::from_secs(1), panel.recv())
            .await
            .expect("timed out waiting for bell event")
            .expect("bell panel stopped")
    }

    /// Next event other than a connection update.
    async fn next(panel: &mut BellPanel) -> BellEvent {
        loop {
            match recv(panel).await {
                BellEvent::Connection(_) => continue,
                other => return other,
            }
        }
    }

    async fn next_snapshot(panel: &mut BellPanel) -> BellSnapshot {
        loop {
            if let BellEvent::Snapshot(s) = next(panel).await {
                return s;
            }
        }
    }

    async fn mounted() -> (Arc<FakeConnector>, Arc<EventChannel>, BellPanel) {
        let connector = Arc::new(FakeConnector::default());
        let channel = Arc::new(EventChannel::new(connector.clone()));
        channel.connect("U1").await.unwrap();
        let mut panel = BellPanel::mount(Arc::clone(&channel), None, "U1", 64);
        let first = next_snapshot(&mut panel).await;
        assert!(first.items.is_empty());
        assert!(!first.loading);
        (connector, channel, panel)
    }

    #[tokio::test]
    async fn test_pushed_notification_shows_and_marks_read() {
        let (connector, _channel, mut panel) = mounted().await;

        connector.push(
            "notification::U1",
            json!({"_id": "n1", "userId": "U1", "type": "success", "message": "Order shipped"}),
        );
        assert_eq!(
            next(&mut panel).await,
            BellEvent::Toast(Toast::new(Tone::Success, "Order shipped"))
        );
        let snap = next_snapshot(&mut panel).await;
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.unread, 1);

        panel.send(BellCommand::MarkAsRead("n1".into()));
        let snap = next_snapshot(&mut panel).await;
        assert_eq!(snap.unread, 0);
        assert!(snap.items[0].is_read);
    }

    #[tokio::test]
    async fn test_same_event_on_both_channels_counts_once() {
        let (connector, _channel, mut panel) = mounted().await;
        let payload = json!({"_id": "n2", "userId": "U1", "message": "Bid placed"});

        connector.push("notification::U1", payload.clone());
        let snap = next_snapshot(&mut panel).await;
        assert_eq!(snap.unread, 1);

        connector.push("notification", payload);
        panel.send(BellCommand::MarkAllAsRead);
        let snap = next_snapshot(&mut panel).await;
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.unread, 0);
    }

    #[tokio::test]
    async fn test_foreign_broadcast_ignored_and_clear_all() {
        let (connector, _channel, mut panel) = mounted().await;

        connector.push("notification", json!({"_id": "x", "userId": "U2", "message": "nope"}));
        connector.push("notification", json!({"_id": "y", "message": "Maintenance tonight"}));
        let snap = next_snapshot(&mut panel).await;
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].id.as_deref(), Some("y"));

        panel.send(BellCommand::ClearAll);
        let snap = next_snapshot(&mut panel).await;
        assert!(snap.items.is_empty());
        assert_eq!(snap.unread, 0);
    }

    #[tokio::test]
    async fn test_unmount_detaches_listeners() {
        let (_connector, channel, panel) = mounted().await;
        assert_eq!(channel.listener_count("notification::U1"), 1);
        assert_eq!(channel.listener_count("notification"), 1);

        panel.unmount().await;
        assert_eq!(channel.listener_count("notification::U1"), 0);
        assert_eq!(channel.listener_count("notification"), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_degrades_quietly() {
        let connector = Arc::new(FakeConnector::default());
        connector.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let channel = Arc::new(EventChannel::new(connector));
        let mut panel = BellPanel::mount(channel, None, "U1", 64);

        loop {
            if let BellEvent::Connection(state) = recv(&mut panel).await {
                assert_eq!(state, ConnectionState::Disconnected);
                break;
            }
        }
    }
}
