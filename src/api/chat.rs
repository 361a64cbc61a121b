//! Support chat endpoints: history and message creation

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use super::client::{json_body, MarketClient};
use super::error::ApiError;
use crate::models::wire::{self, IdRef};
use crate::models::{parse_chat_payload, ChatMessage};

const MESSAGES_PATH: &str = "/support-chat/messages";
const SEND_PATH: &str = "/support-chat/send-message";

/// One page of conversation history.
#[derive(Debug)]
pub struct HistoryPage {
    pub messages: Vec<ChatMessage>,
    pub page: u32,
    pub total_pages: Option<u32>,
}

impl HistoryPage {
    pub fn has_more(&self) -> bool {
        self.total_pages.is_some_and(|total| self.page < total)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageMeta {
    page: Option<u32>,
    #[serde(alias = "totalPage")]
    total_pages: Option<u32>,
}

#[derive(Deserialize)]
struct MetaData {
    meta: Option<PageMeta>,
}

#[derive(Deserialize)]
struct MetaProbe {
    data: MetaData,
}

/// Fetch one page of history for `chat_id`, classifying authorship against `me`.
pub async fn fetch_history(
    client: &MarketClient,
    chat_id: &str,
    me: &str,
    page: u32,
    limit: usize,
) -> Result<HistoryPage, ApiError> {
    let query = [
        ("chatId", chat_id.to_string()),
        ("page", page.to_string()),
        ("limit", limit.to_string()),
    ];
    let resp = client.get(MESSAGES_PATH, &query).await?;
    let body = json_body(resp, &client.url(MESSAGES_PATH)).await?;

    let meta = MetaProbe::deserialize(&body).ok().and_then(|p| p.data.meta);
    let messages = parse_chat_payload(&body, me, Utc::now());
    tracing::debug!("Fetched {} message(s) for chat {}", messages.len(), chat_id);

    Ok(HistoryPage {
        messages,
        page: meta.as_ref().and_then(|m| m.page).unwrap_or(page),
        total_pages: meta.and_then(|m| m.total_pages),
    })
}

/// What the server returns for a created message.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedMessage {
    pub id: Option<String>,
    pub chat_id: Option<String>,
    pub image: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawCreated {
    #[serde(rename = "_id")]
    object_id: Option<IdRef>,
    id: Option<IdRef>,
    #[serde(rename = "chatId")]
    chat_id: Option<IdRef>,
    chat: Option<IdRef>,
    image: Option<String>,
    #[serde(rename = "createdAt", default, deserialize_with = "wire::timestamp")]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CreatedEnvelope {
    data: RawCreated,
}

impl CreatedMessage {
    fn from_body(body: &serde_json::Value) -> Option<Self> {
        let raw = CreatedEnvelope::deserialize(body).ok()?.data;
        Some(Self {
            id: wire::id_string(raw.object_id).or_else(|| wire::id_string(raw.id)),
            chat_id: wire::id_string(raw.chat_id).or_else(|| wire::id_string(raw.chat)),
            image: raw.image.filter(|i| !i.is_empty()),
            created_at: raw.created_at,
        })
    }
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Create a message. Without `chat_id` the server starts a new conversation.
pub async fn create_message(
    client: &MarketClient,
    chat_id: Option<&str>,
    text: &str,
    image: Option<&Path>,
) -> Result<CreatedMessage, ApiError> {
    let mut form = reqwest::multipart::Form::new().text("message", text.to_string());

    if let Some(path) = image {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ApiError::Attachment {
                path: path.display().to_string(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name);
        let part = match image_mime(path) {
            Some(mime) => part.mime_str(mime).map_err(|source| ApiError::Decode {
                url: client.url(SEND_PATH),
                source,
            })?,
            None => part,
        };
        form = form.part("image", part);
    }

    if let Some(chat_id) = chat_id {
        form = form.text("chatId", chat_id.to_string());
    }

    let resp = client.post_multipart(SEND_PATH, form).await?;
    let body = json_body(resp, &client.url(SEND_PATH)).await?;
    let created = CreatedMessage::from_body(&body).unwrap_or(CreatedMessage {
        id: None,
        chat_id: None,
        image: None,
        created_at: None,
    });
    tracing::debug!("Created message {:?} in chat {:?}", created.id, created.chat_id);
    Ok(created)
}
