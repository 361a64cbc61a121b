//! Notification bell state: ordered list, unread counter, toasts

use super::alert::{Tone, Toast};
use super::seen::SeenSet;
use crate::models::NotificationEvent;

/// Upper bound on events held back while the initial list loads.
const MAX_PENDING: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initial list not fetched yet; inbound events are held back.
    Loading,
    Ready,
}

/// Reconciles pushed notifications for one user.
///
/// Events are deduplicated by id (or by content for id-less events), so
/// delivery on both the user-scoped and broadcast channel counts once.
pub struct NotificationReconciler {
    user_id: String,
    phase: Phase,
    /// Newest first.
    items: Vec<NotificationEvent>,
    unread: usize,
    seen: SeenSet,
    pending: Vec<NotificationEvent>,
}

fn dedup_key(event: &NotificationEvent) -> String {
    match &event.id {
        Some(id) => format!("id:{}", id),
        // An arrival time differs per delivery, so it cannot be part of the key.
        None if !event.stamped => format!(
            "anon:{}|{}|{}",
            event.kind.as_str(),
            event.message,
            event.user_id.as_deref().unwrap_or("*")
        ),
        None => format!(
            "anon:{}|{}|{}",
            event.kind.as_str(),
            event.message,
            event.created_at.timestamp_millis()
        ),
    }
}

/// True if `list` already holds an event with the same id.
fn listed(list: &[NotificationEvent], event: &NotificationEvent) -> bool {
    event
        .id
        .as_deref()
        .is_some_and(|id| list.iter().any(|e| e.id.as_deref() == Some(id)))
}

impl NotificationReconciler {
    pub fn new(user_id: impl Into<String>, seen_capacity: usize) -> Self {
        Self {
            user_id: user_id.into(),
            phase: Phase::Loading,
            items: Vec::new(),
            unread: 0,
            seen: SeenSet::new(seen_capacity),
            pending: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn items(&self) -> &[NotificationEvent] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    fn is_foreign(&self, event: &NotificationEvent) -> bool {
        event
            .user_id
            .as_deref()
            .is_some_and(|uid| uid != self.user_id)
    }

    /// Seed from the fetched list and switch to `Ready`.
    ///
    /// Held-back events are replayed afterwards; their toasts are returned.
    /// A failed fetch is passed as an empty list.
    pub fn finish_loading(&mut self, mut initial: Vec<NotificationEvent>) -> Vec<Toast> {
        initial.retain(|e| !self.is_foreign(e));
        initial.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut seeded = Vec::with_capacity(initial.len());
        for event in initial {
            if self.seen.insert(&dedup_key(&event)) && !listed(&seeded, &event) {
                seeded.push(event);
            }
        }
        self.unread = seeded.iter().filter(|e| !e.is_read).count();
        self.items = seeded;
        self.phase = Phase::Ready;

        let held = std::mem::take(&mut self.pending);
        if held.is_empty() {
            return Vec::new();
        }
        tracing::debug!("Replaying {} notification(s) held during load", held.len());
        self.ingest(held)
    }

    /// Apply an inbound batch and return one toast per accepted event.
    pub fn ingest(&mut self, batch: Vec<NotificationEvent>) -> Vec<Toast> {
        if self.phase == Phase::Loading {
            let room = MAX_PENDING.saturating_sub(self.pending.len());
            if batch.len() > room {
                tracing::debug!("Dropping {} notification(s) held during load", batch.len() - room);
            }
            self.pending.extend(batch.into_iter().take(room));
            return Vec::new();
        }

        let mut accepted = Vec::new();
        for event in batch {
            if self.is_foreign(&event) {
                tracing::debug!("Dropping notification for another user: {:?}", event.user_id);
                continue;
            }
            // The seen-set forgets old keys; the list itself still counts.
            if !self.seen.insert(&dedup_key(&event))
                || listed(&self.items, &event)
                || listed(&accepted, &event)
            {
                tracing::debug!("Dropping duplicate notification {:?}", event.id);
                continue;
            }
            accepted.push(event);
        }

        self.unread += accepted.iter().filter(|e| !e.is_read).count();
        let toasts = accepted
            .iter()
            .map(|e| Toast::new(Tone::for_kind(&e.kind), e.message.clone()))
            .collect();
        self.items.splice(0..0, accepted);
        toasts
    }

    /// Mark one entry read. Returns false if no unread entry has that id.
    pub fn mark_as_read(&mut self, id: &str) -> bool {
        match self
            .items
            .iter_mut()
            .find(|e| e.id.as_deref() == Some(id) && !e.is_read)
        {
            Some(event) => {
                event.is_read = true;
                self.unread = self.unread.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    pub fn mark_all_as_read(&mut self) {
        for event in &mut self.items {
            event.is_read = true;
        }
        self.unread = 0;
    }

    /// Empty the list. Seen keys are kept, so a late redelivery of a cleared
    /// event does not bring it back.
    pub fn clear_all(&mut self) {
        self.items.clear();
        self.unread = 0;
    }
}
