//! REST API client for the marketplace backend

pub mod chat;
pub mod client;
pub mod error;
pub mod notifications;

use anyhow::{Context, Result};

pub use chat::{create_message, fetch_history, CreatedMessage, HistoryPage};
pub use client::MarketClient;
pub use error::ApiError;
pub use notifications::fetch_notifications;

use crate::config::Config;
use crate::models::MessageKind;

/// List the user's notifications (prints to stdout).
pub async fn list_notifications() -> Result<()> {
    let config = Config::load()?;
    let client = MarketClient::new(&config)?;

    let events = match fetch_notifications(&client).await {
        Ok(events) => events,
        Err(e) => {
            tracing::debug!("Notification fetch failed: {:#}", e);
            anyhow::bail!(e.load_failure("notifications"));
        }
    };

    println!("\nNotifications:");
    println!("{:-<60}", "");

    if events.is_empty() {
        println!("  (no notifications)");
        return Ok(());
    }

    for event in &events {
        let marker = if event.is_read { " " } else { "*" };
        println!(
            "{} [{}] {} ({})",
            marker,
            event.kind.as_str(),
            event.message,
            event.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// Print one page of a conversation's history.
pub async fn show_history(chat_id: &str, page: u32, limit: usize) -> Result<()> {
    let config = Config::load()?;
    let me = config.require_identity()?.user_id.clone();
    let client = MarketClient::new(&config)?;

    let mut history = fetch_history(&client, chat_id, &me, page, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e.load_failure("messages")))
        .context("History request failed")?;

    history.messages.retain(|m| !m.is_placeholder());
    history.messages.sort_by_key(|m| m.created_at);

    if history.messages.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    for msg in &history.messages {
        if msg.kind != MessageKind::Message {
            continue;
        }
        println!("{}", msg.summary());
    }
    if history.has_more() {
        println!(
            "-- page {} of {}, use --page {} for more --",
            history.page,
            history.total_pages.unwrap_or(history.page),
            history.page + 1
        );
    }

    Ok(())
}
