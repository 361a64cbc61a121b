//! Mounted views that drive the reconcilers
//!
//! A panel is one background task that owns its reconciler, its event
//! subscriptions, its timers and its in-flight API calls. The caller talks to
//! it through a command/event channel pair, the same way the TUI talks to a
//! backend. Unmounting aborts the task, which drops everything it owns.

pub mod bell;
pub mod chat;

use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;

pub use bell::{BellCommand, BellEvent, BellPanel, BellSnapshot};
pub use chat::{ChatCommand, ChatEvent, ChatOptions, ChatPanel};

/// Handle to a mounted panel task.
pub struct Panel<C, E> {
    cmd_tx: mpsc::UnboundedSender<C>,
    events: mpsc::UnboundedReceiver<E>,
    task: Option<JoinHandle<()>>,
}

impl<C: Send + 'static, E: Send + 'static> Panel<C, E> {
    fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(mpsc::UnboundedReceiver<C>, mpsc::UnboundedSender<E>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(cmd_rx, event_tx));
        Self {
            cmd_tx,
            events,
            task: Some(task),
        }
    }

    /// Send a command to the panel (non-blocking).
    pub fn send(&self, cmd: C) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Panel task has stopped -- command dropped");
        }
    }

    /// Next event published by the panel. `None` once the task has ended.
    pub async fn recv(&mut self) -> Option<E> {
        self.events.recv().await
    }

    /// Stop the panel and wait until its subscriptions, timers and calls are
    /// gone.
    pub async fn unmount(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl<C, E> Drop for Panel<C, E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Resolves when the timer fires; never, when there is none.
async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fire_pending_without_timer() {
        let mut timer = None;
        let waited = tokio::time::timeout(Duration::from_millis(20), fire(&mut timer)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_fire_resolves_when_timer_elapses() {
        let mut timer = Some(Box::pin(tokio::time::sleep(Duration::from_millis(5))));
        let waited = tokio::time::timeout(Duration::from_secs(1), fire(&mut timer)).await;
        assert!(waited.is_ok());
    }
}
