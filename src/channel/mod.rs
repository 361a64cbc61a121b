//! Event channel: one shared publish/subscribe connection per user session
//!
//! `EventChannel` is the connection manager handed to every panel that needs
//! live delivery. It owns at most one transport, opens it lazily on the first
//! `connect`, and lets callers attach/detach named listeners whether or not
//! the transport exists yet. Listener registrations outlive reconnects since
//! they live here, not in the transport.

pub mod frame;
pub mod names;
pub mod session;
pub mod websocket;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use tokio::sync::mpsc;

/// Connection lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// A live link to the message server.
pub trait Transport: Send + Sync {
    fn state(&self) -> ConnectionState;
    /// Queue an event for sending.
    fn emit(&self, event: &str, payload: &Value) -> Result<()>;
    /// Close the link. Idempotent.
    fn disconnect(&self);
}

/// Opens transports. Inbound events must be delivered through `inbound`.
pub trait Connector: Send + Sync {
    fn open<'a>(
        &'a self,
        user_id: &'a str,
        inbound: Listeners,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>>>;
}

/// Identifies one attached listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    by_event: HashMap<String, Vec<(ListenerId, mpsc::UnboundedSender<Value>)>>,
}

/// Registry of listeners keyed by event name. Cheap to clone.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<Mutex<ListenerTable>>,
}

impl Listeners {
    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerTable> {
        // A panicking listener owner must not take delivery down with it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, event: &str) -> (ListenerId, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut table = self.lock();
        table.next_id += 1;
        let id = ListenerId(table.next_id);
        table
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut table = self.lock();
        let Some(list) = table.by_event.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            table.by_event.remove(event);
        }
        removed
    }

    /// Deliver an inbound event to every listener of `event`.
    ///
    /// Returns how many listeners received it. Listeners whose receiving
    /// side is gone are pruned.
    pub fn dispatch(&self, event: &str, payload: Value) -> usize {
        let mut table = self.lock();
        let Some(list) = table.by_event.get_mut(event) else {
            tracing::debug!("No listeners for event {}", event);
            return 0;
        };
        list.retain(|(_, tx)| tx.send(payload.clone()).is_ok());
        let delivered = list.len();
        if list.is_empty() {
            table.by_event.remove(event);
        }
        delivered
    }

    /// Number of listeners attached to `event`.
    pub fn count(&self, event: &str) -> usize {
        self.lock().by_event.get(event).map_or(0, Vec::len)
    }
}

/// An attached listener. Detaches itself when dropped.
pub struct Subscription {
    event: String,
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<Value>,
    listeners: Listeners,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Next payload delivered on this event name.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Value>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listeners.remove(&self.event, self.id);
    }
}

struct Live {
    user_id: String,
    transport: Arc<dyn Transport>,
}

/// Shared connection manager.
pub struct EventChannel {
    connector: Arc<dyn Connector>,
    listeners: Listeners,
    current: Mutex<Option<Live>>,
    /// Serialises `connect` so concurrent callers cannot open two transports.
    connect_lock: tokio::sync::Mutex<()>,
}

impl EventChannel {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            listeners: Listeners::default(),
            current: Mutex::new(None),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Live>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the transport for `user_id`, opening one if needed.
    ///
    /// A transport that is connected or still reconnecting on its own is
    /// reused. A disconnected one, or one opened for another user, is torn
    /// down and replaced.
    pub async fn connect(&self, user_id: &str) -> Result<Arc<dyn Transport>> {
        let _guard = self.connect_lock.lock().await;

        let stale = {
            let mut slot = self.slot();
            let reusable = slot
                .as_ref()
                .filter(|live| {
                    live.user_id == user_id
                        && live.transport.state() != ConnectionState::Disconnected
                })
                .map(|live| Arc::clone(&live.transport));
            if let Some(transport) = reusable {
                tracing::debug!("Reusing event channel transport for {}", user_id);
                return Ok(transport);
            }
            slot.take()
        };
        if let Some(stale) = stale {
            tracing::info!("Replacing event channel transport (was {})", stale.user_id);
            stale.transport.disconnect();
        }

        tracing::info!("Opening event channel for {}", user_id);
        let transport = self
            .connector
            .open(user_id, self.listeners.clone())
            .await
            .with_context(|| format!("Failed to open event channel for {}", user_id))?;

        *self.slot() = Some(Live {
            user_id: user_id.to_string(),
            transport: Arc::clone(&transport),
        });
        Ok(transport)
    }

    /// The current transport, without opening one.
    pub fn get(&self) -> Option<Arc<dyn Transport>> {
        self.slot().as_ref().map(|live| Arc::clone(&live.transport))
    }

    pub fn state(&self) -> ConnectionState {
        self.get()
            .map_or(ConnectionState::Disconnected, |t| t.state())
    }

    /// Attach a listener for `event`.
    pub fn on(&self, event: &str) -> Subscription {
        let (id, rx) = self.listeners.add(event);
        tracing::debug!("Listening on {} ({:?})", event, id);
        Subscription {
            event: event.to_string(),
            id,
            rx,
            listeners: self.listeners.clone(),
        }
    }

    /// Detach a listener. Same as dropping the subscription.
    pub fn off(&self, subscription: Subscription) {
        tracing::debug!(
            "Detaching {} ({:?})",
            subscription.event(),
            subscription.id()
        );
        drop(subscription);
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    /// Send an event upstream.
    pub fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        let transport = self
            .get()
            .context("Event channel is not connected")?;
        transport.emit(event, payload)
    }

    /// Disconnect and forget the transport. Listeners stay attached.
    pub fn shutdown(&self) {
        if let Some(live) = self.slot().take() {
            tracing::info!("Closing event channel for {}", live.user_id);
            live.transport.disconnect();
        }
    }
}

/// In-memory connector and transport for tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct FakeTransport {
        pub user_id: String,
        state: Mutex<ConnectionState>,
        pub sent: Mutex<Vec<(String, Value)>>,
    }

    impl FakeTransport {
        pub fn set_state(&self, state: ConnectionState) {
            *self.state.lock().unwrap() = state;
        }

        pub fn sent(&self) -> Vec<(String, Value)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for FakeTransport {
        fn state(&self) -> ConnectionState {
            *self.state.lock().unwrap()
        }

        fn emit(&self, event: &str, payload: &Value) -> Result<()> {
            anyhow::ensure!(
                self.state() == ConnectionState::Connected,
                "fake transport is not connected"
            );
            self.sent
                .lock()
                .unwrap()
                .push((event.to_string(), payload.clone()));
            Ok(())
        }

        fn disconnect(&self) {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Records every transport it opens and exposes the inbound registry so
    /// tests can push events.
    #[derive(Default)]
    pub struct FakeConnector {
        pub opened: AtomicUsize,
        pub fail: std::sync::atomic::AtomicBool,
        pub transports: Mutex<Vec<Arc<FakeTransport>>>,
        pub inbound: Mutex<Option<Listeners>>,
    }

    impl FakeConnector {
        pub fn last(&self) -> Option<Arc<FakeTransport>> {
            self.transports.lock().unwrap().last().cloned()
        }

        pub fn push(&self, event: &str, payload: Value) -> usize {
            let inbound = self.inbound.lock().unwrap().clone();
            inbound.map_or(0, |l| l.dispatch(event, payload))
        }
    }

    impl Connector for FakeConnector {
        fn open<'a>(
            &'a self,
            user_id: &'a str,
            inbound: Listeners,
        ) -> BoxFuture<'a, Result<Arc<dyn Transport>>> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    anyhow::bail!("connection refused");
                }
                self.opened.fetch_add(1, Ordering::SeqCst);
                let transport = Arc::new(FakeTransport {
                    user_id: user_id.to_string(),
                    state: Mutex::new(ConnectionState::Connected),
                    sent: Mutex::new(Vec::new()),
                });
                self.transports.lock().unwrap().push(Arc::clone(&transport));
                *self.inbound.lock().unwrap() = Some(inbound);
                Ok(transport as Arc<dyn Transport>)
            })
        }
    }
}
