//! Event names used as routing keys on the channel.

/// Broadcast notifications for every user.
pub const NOTIFICATION: &str = "notification";

/// Scoped chat event; the conversation travels in the payload's `chatId`.
pub const CHAT_MESSAGE: &str = "chat-message";

/// Diagnostic event emitted once when a chat panel mounts.
pub const CONNECTION_TEST: &str = "connection-test";

/// Older per-name chat events, still accepted inbound.
const LEGACY_CHAT_EVENTS: [&str; 3] = ["support-message", "new-support-message", "new-message"];

/// Legacy names that also exist in a `::<chatId>` scoped form.
const LEGACY_SCOPED_CHAT_EVENTS: [&str; 2] = ["support-message", "new-support-message"];

/// Notifications addressed to one user.
pub fn notification_for(user_id: &str) -> String {
    format!("{}::{}", NOTIFICATION, user_id)
}

/// Every event name a chat view listens on.
pub fn chat_inbound(chat_id: Option<&str>) -> Vec<String> {
    let mut names = vec![CHAT_MESSAGE.to_string()];
    names.extend(LEGACY_CHAT_EVENTS.iter().map(|n| n.to_string()));
    if let Some(chat_id) = chat_id {
        names.extend(
            LEGACY_SCOPED_CHAT_EVENTS
                .iter()
                .map(|n| format!("{}::{}", n, chat_id)),
        );
    }
    names
}

/// Legacy names a sent message is fanned out to when that is enabled.
pub fn chat_legacy_outbound(chat_id: &str) -> Vec<String> {
    let mut names: Vec<String> = LEGACY_CHAT_EVENTS.iter().map(|n| n.to_string()).collect();
    names.extend(
        LEGACY_SCOPED_CHAT_EVENTS
            .iter()
            .map(|n| format!("{}::{}", n, chat_id)),
    );
    names
}
