//! Notification models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire::{self, IdRef};

/// Notification category, as sent in the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
    Warning,
    Other(String),
}

impl From<String> for NotificationKind {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "success" => Self::Success,
            "error" => Self::Error,
            "info" => Self::Info,
            "warning" => Self::Warning,
            _ => Self::Other(s),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl NotificationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Other(s) => s,
        }
    }
}

/// A single alert addressed to the user (or broadcast when `user_id` is None).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: Option<String>,
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    /// False when the payload had no timestamp and `created_at` is the
    /// arrival time.
    #[serde(skip)]
    pub stamped: bool,
}

/// Notification as it arrives from the API or the event channel.
///
/// Alternative spellings are separate fields rather than serde aliases since
/// documents often carry both (`_id` next to a virtual `id`, `title` next to
/// `message`).
#[derive(Debug, Deserialize)]
pub struct RawNotification {
    #[serde(rename = "_id")]
    object_id: Option<IdRef>,
    id: Option<IdRef>,
    #[serde(rename = "userId", alias = "user_id")]
    user_id: Option<IdRef>,
    receiver: Option<IdRef>,
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
    text: Option<String>,
    title: Option<String>,
    #[serde(rename = "isRead", alias = "is_read", default)]
    is_read: bool,
    #[serde(
        rename = "createdAt",
        alias = "created_at",
        default,
        deserialize_with = "wire::timestamp"
    )]
    created_at: Option<DateTime<Utc>>,
}

impl RawNotification {
    /// Normalize; returns None for payloads without any message text.
    pub fn normalize(self, now: DateTime<Utc>) -> Option<NotificationEvent> {
        let message = [self.message, self.text, self.title]
            .into_iter()
            .flatten()
            .find(|m| !m.trim().is_empty())?;
        Some(NotificationEvent {
            id: wire::id_string(self.object_id).or_else(|| wire::id_string(self.id)),
            user_id: wire::id_string(self.user_id).or_else(|| wire::id_string(self.receiver)),
            kind: self
                .kind
                .map(NotificationKind::from)
                .unwrap_or(NotificationKind::Info),
            message,
            is_read: self.is_read,
            stamped: self.created_at.is_some(),
            created_at: self.created_at.unwrap_or(now),
        })
    }
}

/// Every envelope a notification payload is known to come in.
#[derive(Deserialize)]
#[serde(untagged)]
enum NotificationPayload {
    Wrapped { data: Box<NotificationPayload> },
    Listing {
        #[serde(alias = "result")]
        notifications: Vec<RawNotification>,
    },
    Batch(Vec<RawNotification>),
    Single(RawNotification),
}

impl NotificationPayload {
    fn flatten(self, out: &mut Vec<RawNotification>) {
        match self {
            Self::Wrapped { data } => data.flatten(out),
            Self::Listing { notifications } | Self::Batch(notifications) => {
                out.extend(notifications)
            }
            Self::Single(raw) => out.push(raw),
        }
    }
}

/// Normalize a pushed payload (single event, batch or wrapped) into events.
///
/// Anything that does not decode yields an empty batch.
pub fn parse_notifications(
    payload: &serde_json::Value,
    now: DateTime<Utc>,
) -> Vec<NotificationEvent> {
    let decoded = match NotificationPayload::deserialize(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("Dropping undecodable notification payload: {}", e);
            return Vec::new();
        }
    };
    let mut raw = Vec::new();
    decoded.flatten(&mut raw);
    raw.into_iter().filter_map(|r| r.normalize(now)).collect()
}
