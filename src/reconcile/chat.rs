//! Support conversation state: history, live pushes and optimistic sends
//!
//! Three sources feed one rendered list. History comes from the REST API and
//! is replaced wholesale on every (re)load; live messages arrive over the
//! event channel; local entries are the temporaries shown while a send is in
//! flight plus system bubbles for failures. `view()` merges them.

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;

use crate::api::CreatedMessage;
use crate::config::Timing;
use crate::models::{ChatMessage, MessageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    /// A temporary collapses into a real message at most this far apart.
    pub confirm_window: Duration,
    /// Unconfirmed temporaries older than this are swept.
    pub temporary_ttl: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self::from(&Timing::default())
    }
}

impl From<&Timing> for ChatSettings {
    fn from(timing: &Timing) -> Self {
        Self {
            confirm_window: Duration::milliseconds(timing.confirm_window_ms as i64),
            temporary_ttl: Duration::milliseconds(timing.temporary_ttl_ms as i64),
        }
    }
}

/// A send that has been shown optimistically and still has to go out.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub temp_id: String,
    pub chat_id: Option<String>,
    pub text: String,
    pub image: Option<PathBuf>,
}

/// What the caller should do after a send succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// A conversation id was just learned; load its history.
    LoadHistory(String),
    /// Re-read the known conversation shortly.
    Refetch,
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    /// The server-confirmed message, for pushing to other subscribers.
    pub confirmed: Option<ChatMessage>,
    pub follow_up: FollowUp,
}

pub struct ChatReconciler {
    me: String,
    chat_id: Option<String>,
    history: Vec<ChatMessage>,
    live: Vec<ChatMessage>,
    local: Vec<ChatMessage>,
    settings: ChatSettings,
}

impl ChatReconciler {
    pub fn new(me: impl Into<String>, chat_id: Option<String>, settings: ChatSettings) -> Self {
        Self {
            me: me.into(),
            chat_id: chat_id.filter(|c| !c.is_empty()),
            history: Vec::new(),
            live: Vec::new(),
            local: Vec::new(),
            settings,
        }
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    /// Start tracking `chat_id`. Returns false if it was already known.
    pub fn adopt_chat_id(&mut self, chat_id: &str) -> bool {
        if self.chat_id.as_deref() == Some(chat_id) {
            return false;
        }
        tracing::debug!("Adopting chat {}", chat_id);
        self.chat_id = Some(chat_id.to_string());
        self.live.retain(|m| m.chat_id.as_deref() == Some(chat_id));
        for msg in &mut self.local {
            msg.chat_id.get_or_insert_with(|| chat_id.to_string());
        }
        true
    }

    /// Replace the fetched history. Placeholder entries are discarded.
    pub fn replace_history(&mut self, messages: Vec<ChatMessage>) {
        self.history = messages.into_iter().filter(|m| !m.is_placeholder()).collect();
        let history = &self.history;
        self.live
            .retain(|live| !history.iter().any(|h| h.id == live.id));
    }

    /// Accept live messages for the current conversation. Returns true if
    /// anything was added.
    pub fn ingest_live(&mut self, messages: Vec<ChatMessage>) -> bool {
        let mut changed = false;
        for msg in messages {
            let Some(current) = self.chat_id.as_deref() else {
                tracing::debug!("Dropping live message {} before a chat exists", msg.id);
                continue;
            };
            if msg.chat_id.as_deref() != Some(current) {
                tracing::debug!(
                    "Dropping live message {} for chat {:?}",
                    msg.id,
                    msg.chat_id
                );
                continue;
            }
            if msg.is_placeholder() || self.live.iter().any(|m| m.id == msg.id) {
                continue;
            }
            self.live.push(msg);
            changed = true;
        }
        changed
    }

    /// Show a temporary entry for a send. Returns `None` (and changes
    /// nothing) when there is neither text nor an attachment.
    pub fn begin_send(
        &mut self,
        text: &str,
        image: Option<PathBuf>,
        now: DateTime<Utc>,
    ) -> Option<Outgoing> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return None;
        }
        let image_label = image.as_ref().map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        });
        let temp = ChatMessage::temporary(
            &self.me,
            self.chat_id.clone(),
            (!text.is_empty()).then(|| text.to_string()),
            image_label,
            now,
        );
        let outgoing = Outgoing {
            temp_id: temp.id.clone(),
            chat_id: self.chat_id.clone(),
            text: text.to_string(),
            image,
        };
        self.local.push(temp);
        Some(outgoing)
    }

    /// Record a successful send.
    ///
    /// The confirmed message joins the live list so its temporary collapses
    /// right away rather than waiting for the next history load.
    pub fn confirm_send(
        &mut self,
        outgoing: &Outgoing,
        created: CreatedMessage,
        now: DateTime<Utc>,
    ) -> SendOutcome {
        let chat_id = created.chat_id.or_else(|| outgoing.chat_id.clone());

        let follow_up = match (&self.chat_id, &chat_id) {
            (None, Some(new_id)) => {
                self.adopt_chat_id(new_id);
                FollowUp::LoadHistory(new_id.clone())
            }
            (Some(_), _) => FollowUp::Refetch,
            (None, None) => FollowUp::Nothing,
        };

        let confirmed = created.id.map(|id| {
            let mut msg = ChatMessage::temporary(
                &self.me,
                chat_id.clone(),
                (!outgoing.text.is_empty()).then(|| outgoing.text.clone()),
                created.image,
                created.created_at.unwrap_or(now),
            );
            msg.id = id;
            msg.is_temporary = false;
            msg
        });

        if let Some(ref msg) = confirmed {
            if msg.chat_id.is_some() && msg.chat_id == self.chat_id {
                self.ingest_live(vec![msg.clone()]);
            }
        }

        SendOutcome {
            confirmed,
            follow_up,
        }
    }

    /// Record a failed send as a system bubble. The temporary stays until
    /// the sweep removes it.
    pub fn fail_send(&mut self, reason: &str, now: DateTime<Utc>) {
        self.local
            .push(ChatMessage::system(reason, self.chat_id.clone(), now));
    }

    /// Drop temporaries older than the TTL. Returns true if any were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> bool {
        let ttl = self.settings.temporary_ttl;
        let before = self.local.len();
        self.local
            .retain(|m| !m.is_temporary || now - m.created_at <= ttl);
        let removed = before - self.local.len();
        if removed > 0 {
            tracing::debug!("Swept {} unconfirmed message(s)", removed);
        }
        removed > 0
    }

    fn is_confirmed(&self, temp: &ChatMessage, merged: &[ChatMessage]) -> bool {
        merged.iter().any(|m| {
            !m.is_temporary
                && m.kind == MessageKind::Message
                && m.author == temp.author
                && m.text_key() == temp.text_key()
                && (m.created_at - temp.created_at).abs() <= self.settings.confirm_window
        })
    }

    /// The rendered conversation, oldest first, greeting on top.
    pub fn view(&self) -> Vec<ChatMessage> {
        let mut merged: Vec<ChatMessage> = self
            .history
            .iter()
            .chain(&self.live)
            .chain(&self.local)
            .cloned()
            .collect();
        merged.sort_by_key(|m| m.created_at);

        let mut ids = std::collections::HashSet::new();
        merged.retain(|m| ids.insert(m.id.clone()));

        let confirmed: Vec<bool> = merged
            .iter()
            .map(|m| m.is_temporary && self.is_confirmed(m, &merged))
            .collect();
        let mut flags = confirmed.into_iter();
        merged.retain(|_| !flags.next().unwrap_or(false));

        let mut view = Vec::with_capacity(merged.len() + 1);
        view.push(ChatMessage::greeting());
        view.extend(merged);
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn msg(id: &str, chat: &str, author: Author, text: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            chat_id: Some(chat.to_string()),
            sender_id: if author == Author::Me { "U1".into() } else { "S".into() },
            author,
            text: Some(text.to_string()),
            image: None,
            created_at: at(secs),
            is_temporary: false,
            kind: MessageKind::Message,
        }
    }

    fn reconciler(chat: Option<&str>) -> ChatReconciler {
        ChatReconciler::new("U1", chat.map(String::from), ChatSettings::default())
    }

    fn created(id: &str, chat: Option<&str>, secs: i64) -> CreatedMessage {
        CreatedMessage {
            id: Some(id.to_string()),
            chat_id: chat.map(String::from),
            image: None,
            created_at: Some(at(secs)),
        }
    }

    fn texts(view: &[ChatMessage]) -> Vec<String> {
        view.iter().map(|m| m.text_key().to_string()).collect()
    }

    #[test]
    fn test_empty_view_is_just_greeting() {
        let view = reconciler(None).view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].kind, MessageKind::Greeting);
    }

    #[test]
    fn test_mixed_sources_sorted_by_time() {
        let mut rec = reconciler(Some("c1"));
        rec.replace_history(vec![msg("h3", "c1", Author::Peer, "three", 3)]);
        rec.ingest_live(vec![msg("l1", "c1", Author::Peer, "one", 1)]);
        rec.begin_send("two", None, at(2));

        let view = rec.view();
        assert_eq!(texts(&view[1..]), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_temporary_collapses_into_confirmation() {
        let mut rec = reconciler(Some("c1"));
        rec.begin_send("hello", None, at(0));
        assert_eq!(rec.view().len(), 2);
        assert!(rec.view()[1].is_temporary);

        rec.ingest_live(vec![msg("m1", "c1", Author::Me, "hello", 2)]);
        let view = rec.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[1].id, "m1");
        assert!(!view[1].is_temporary);
    }

    #[test]
    fn test_confirmation_outside_window_does_not_collapse() {
        let mut rec = reconciler(Some("c1"));
        rec.begin_send("hello", None, at(0));
        rec.ingest_live(vec![msg("m1", "c1", Author::Me, "hello", 6)]);
        assert_eq!(rec.view().len(), 3);
    }

    #[test]
    fn test_peer_message_with_same_text_does_not_collapse() {
        let mut rec = reconciler(Some("c1"));
        rec.begin_send("ok", None, at(0));
        rec.ingest_live(vec![msg("m1", "c1", Author::Peer, "ok", 1)]);
        assert_eq!(rec.view().len(), 3);
    }

    #[test]
    fn test_duplicate_ids_render_once() {
        let mut rec = reconciler(Some("c1"));
        let m = msg("m1", "c1", Author::Peer, "hi", 1);
        rec.replace_history(vec![m.clone()]);
        rec.ingest_live(vec![m.clone(), m]);
        assert_eq!(rec.view().len(), 2);
    }

    #[test]
    fn test_welcome_placeholder_removed_from_history() {
        let mut rec = reconciler(Some("c1"));
        rec.replace_history(vec![
            msg("welcome", "c1", Author::Peer, "Welcome!", 0),
            msg("m1", "c1", Author::Peer, "hi", 1),
        ]);
        let view = rec.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[1].id, "m1");
    }

    #[test]
    fn test_live_messages_for_other_chat_or_before_chat_dropped() {
        let mut rec = reconciler(None);
        assert!(!rec.ingest_live(vec![msg("a", "c1", Author::Peer, "x", 0)]));

        rec.adopt_chat_id("c1");
        assert!(!rec.ingest_live(vec![msg("b", "c2", Author::Peer, "x", 0)]));
        let mut unscoped = msg("c", "c1", Author::Peer, "x", 0);
        unscoped.chat_id = None;
        assert!(!rec.ingest_live(vec![unscoped]));
        assert!(rec.ingest_live(vec![msg("d", "c1", Author::Peer, "x", 0)]));
        assert_eq!(rec.view().len(), 2);
    }

    #[test]
    fn test_blank_send_is_noop() {
        let mut rec = reconciler(Some("c1"));
        assert!(rec.begin_send("   ", None, at(0)).is_none());
        assert_eq!(rec.view().len(), 1);

        let out = rec
            .begin_send("", Some(PathBuf::from("/tmp/shot.png")), at(0))
            .unwrap();
        assert_eq!(out.text, "");
        assert_eq!(rec.view()[1].image.as_deref(), Some("shot.png"));
    }

    #[test]
    fn test_unconfirmed_temporary_swept_after_ttl() {
        let mut rec = reconciler(Some("c1"));
        rec.begin_send("lost", None, at(0));
        assert!(!rec.sweep(at(8)));
        assert_eq!(rec.view().len(), 2);
        // Sweeps run every 2s, so the entry is gone by 12s at the latest.
        assert!(rec.sweep(at(12)));
        assert_eq!(rec.view().len(), 1);
    }

    #[test]
    fn test_first_send_adopts_chat_and_loads_history() {
        let mut rec = reconciler(None);
        let out = rec.begin_send("help", None, at(0)).unwrap();
        assert_eq!(out.chat_id, None);

        let outcome = rec.confirm_send(&out, created("m1", Some("c9"), 1), at(1));
        assert_eq!(outcome.follow_up, FollowUp::LoadHistory("c9".into()));
        assert_eq!(rec.chat_id(), Some("c9"));

        let confirmed = outcome.confirmed.unwrap();
        assert_eq!(confirmed.id, "m1");
        assert_eq!(confirmed.chat_id.as_deref(), Some("c9"));
        assert_eq!(confirmed.author, Author::Me);

        let view = rec.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[1].id, "m1");
    }

    #[test]
    fn test_send_into_known_chat_requests_refetch() {
        let mut rec = reconciler(Some("c1"));
        let out = rec.begin_send("again", None, at(0)).unwrap();
        let outcome = rec.confirm_send(&out, created("m2", None, 0), at(0));
        assert_eq!(outcome.follow_up, FollowUp::Refetch);
        assert_eq!(rec.chat_id(), Some("c1"));
        assert_eq!(rec.view().len(), 2);
    }

    #[test]
    fn test_failed_send_adds_system_bubble_and_keeps_temporary() {
        let mut rec = reconciler(Some("c1"));
        rec.begin_send("boom", None, at(0));
        rec.fail_send("Server error. Please try again later.", at(1));
        let view = rec.view();
        assert_eq!(view.len(), 3);
        assert!(view[1].is_temporary);
        assert_eq!(view[2].kind, MessageKind::System);

        // The bubble survives the sweep, the temporary does not.
        rec.sweep(at(30));
        let view = rec.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[1].kind, MessageKind::System);
    }

    #[test]
    fn test_history_reload_supersedes_live_copies() {
        let mut rec = reconciler(Some("c1"));
        rec.ingest_live(vec![msg("m1", "c1", Author::Peer, "hi", 1)]);
        rec.replace_history(vec![msg("m1", "c1", Author::Peer, "hi", 1)]);
        assert!(rec.live.is_empty());
        assert_eq!(rec.view().len(), 2);
    }
}
