//! Chat-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire::{self, IdRef};

/// Text of the greeting shown at the top of every conversation.
pub const GREETING_TEXT: &str = "Hello! How can I help you today?";

/// Id the server uses for its empty-conversation placeholder.
const WELCOME_PLACEHOLDER_ID: &str = "welcome";

/// Who wrote a message, from the current user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    Me,
    Peer,
}

impl Author {
    /// Classify by comparing the sender id (already coerced to a string).
    pub fn classify(sender_id: &str, me: &str) -> Self {
        if sender_id == me {
            Author::Me
        } else {
            Author::Peer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Real conversation content.
    Message,
    /// Locally rendered notice (e.g. a failed send).
    System,
    /// Fixed greeting prepended to every rendered view.
    Greeting,
}

/// A unit of conversation content in its canonical shape.
///
/// Serializes to the same field names the server uses, so it can be pushed
/// as-is to other subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub chat_id: Option<String>,
    #[serde(rename = "sender")]
    pub sender_id: String,
    #[serde(skip)]
    pub author: Author,
    #[serde(rename = "message", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub is_temporary: bool,
    #[serde(skip)]
    pub kind: MessageKind,
}

impl ChatMessage {
    /// Optimistic entry for a message the current user is sending.
    pub fn temporary(
        me: &str,
        chat_id: Option<String>,
        text: Option<String>,
        image: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("temp-{}", uuid::Uuid::new_v4()),
            chat_id,
            sender_id: me.to_string(),
            author: Author::Me,
            text,
            image,
            created_at: now,
            is_temporary: true,
            kind: MessageKind::Message,
        }
    }

    /// Local notice rendered inside the conversation.
    pub fn system(text: impl Into<String>, chat_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("system-{}", uuid::Uuid::new_v4()),
            chat_id,
            sender_id: String::new(),
            author: Author::Peer,
            text: Some(text.into()),
            image: None,
            created_at: now,
            is_temporary: false,
            kind: MessageKind::System,
        }
    }

    pub fn greeting() -> Self {
        Self {
            id: "greeting".to_string(),
            chat_id: None,
            sender_id: String::new(),
            author: Author::Peer,
            text: Some(GREETING_TEXT.to_string()),
            image: None,
            created_at: DateTime::<Utc>::MIN_UTC,
            is_temporary: false,
            kind: MessageKind::Greeting,
        }
    }

    /// True for the server's synthetic empty-state entry.
    pub fn is_placeholder(&self) -> bool {
        self.kind == MessageKind::Greeting || self.id == WELCOME_PLACEHOLDER_ID
    }

    /// One-line rendering: `[HH:MM] who: text [image]`.
    pub fn summary(&self) -> String {
        let who = match (self.kind, self.author) {
            (MessageKind::System, _) => "system",
            (MessageKind::Greeting, _) => "support",
            (_, Author::Me) => "me",
            (_, Author::Peer) => "them",
        };
        let mut line = if self.kind == MessageKind::Greeting {
            format!("{}: {}", who, self.text_key())
        } else {
            format!(
                "[{}] {}: {}",
                self.created_at.with_timezone(&chrono::Local).format("%H:%M"),
                who,
                self.text_key()
            )
        };
        if let Some(ref image) = self.image {
            line.push_str(&format!(" [image: {}]", image));
        }
        if self.is_temporary {
            line.push_str(" (sending...)");
        }
        line
    }

    /// Trimmed text, for comparisons.
    pub fn text_key(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or("")
    }
}

/// Chat message as the API or the event channel sends it.
///
/// The sender may be a bare id or a populated user object; text may be in
/// `message` or `text`.
#[derive(Debug, Deserialize)]
pub struct RawChatMessage {
    #[serde(rename = "_id")]
    object_id: Option<IdRef>,
    id: Option<IdRef>,
    #[serde(rename = "chatId", alias = "chat_id")]
    chat_id: Option<IdRef>,
    chat: Option<IdRef>,
    sender: Option<IdRef>,
    #[serde(rename = "senderId", alias = "sender_id")]
    sender_id: Option<IdRef>,
    message: Option<String>,
    text: Option<String>,
    image: Option<String>,
    #[serde(
        rename = "createdAt",
        alias = "created_at",
        default,
        deserialize_with = "wire::timestamp"
    )]
    created_at: Option<DateTime<Utc>>,
}

impl RawChatMessage {
    /// Normalize into the canonical shape. Messages without an id or without
    /// any content are dropped.
    pub fn normalize(self, me: &str, now: DateTime<Utc>) -> Option<ChatMessage> {
        let id = wire::id_string(self.object_id).or_else(|| wire::id_string(self.id))?;
        let text = [self.message, self.text]
            .into_iter()
            .flatten()
            .find(|t| !t.trim().is_empty());
        let image = self.image.filter(|i| !i.is_empty());
        if text.is_none() && image.is_none() {
            return None;
        }
        let sender_id = wire::id_string(self.sender)
            .or_else(|| wire::id_string(self.sender_id))
            .unwrap_or_default();

        Some(ChatMessage {
            id,
            chat_id: wire::id_string(self.chat_id).or_else(|| wire::id_string(self.chat)),
            author: Author::classify(&sender_id, me),
            sender_id,
            text,
            image,
            created_at: self.created_at.unwrap_or(now),
            is_temporary: false,
            kind: MessageKind::Message,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    #[serde(rename = "chat-message")]
    ChatMessage,
}

/// The single outbound chat event: the message plus the conversation it is
/// scoped to, so subscribers filter on `chatId` instead of event names.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope<'a> {
    pub kind: EnvelopeKind,
    pub chat_id: &'a str,
    pub message: &'a ChatMessage,
}

impl<'a> ChatEnvelope<'a> {
    pub fn new(chat_id: &'a str, message: &'a ChatMessage) -> Self {
        Self {
            kind: EnvelopeKind::ChatMessage,
            chat_id,
            message,
        }
    }
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[allow(dead_code)]
    kind: EnvelopeKind,
    #[serde(rename = "chatId")]
    chat_id: IdRef,
    message: RawChatMessage,
}

/// Every shape a chat payload is known to arrive in.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChatPayload {
    Envelope(InboundEnvelope),
    Wrapped { data: Box<ChatPayload> },
    Listing {
        #[serde(alias = "result")]
        messages: Vec<RawChatMessage>,
    },
    Batch(Vec<RawChatMessage>),
    Single(RawChatMessage),
}

impl ChatPayload {
    fn flatten(self, me: &str, now: DateTime<Utc>, out: &mut Vec<ChatMessage>) {
        match self {
            Self::Envelope(env) => {
                let scope = env.chat_id.into_string();
                if let Some(mut msg) = env.message.normalize(me, now) {
                    msg.chat_id.get_or_insert(scope);
                    out.push(msg);
                }
            }
            Self::Wrapped { data } => data.flatten(me, now, out),
            Self::Listing { messages } | Self::Batch(messages) => {
                out.extend(messages.into_iter().filter_map(|m| m.normalize(me, now)))
            }
            Self::Single(raw) => out.extend(raw.normalize(me, now)),
        }
    }
}

/// Normalize any chat payload into canonical messages, classifying authorship
/// against `me`. Undecodable payloads yield nothing.
pub fn parse_chat_payload(
    payload: &serde_json::Value,
    me: &str,
    now: DateTime<Utc>,
) -> Vec<ChatMessage> {
    let decoded = match ChatPayload::deserialize(payload) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!("Dropping undecodable chat payload: {}", e);
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    decoded.flatten(me, now, &mut out);
    out
}
