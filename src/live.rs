//! Line-mode live commands: listen, chat, send and ping
//!
//! Each command mounts the same panels the TUI uses and prints what they
//! publish, so the terminal output follows the same reconciliation rules.

use anyhow::{Context, Result};
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::MarketClient;
use crate::channel::websocket::SocketConnector;
use crate::channel::{names, EventChannel};
use crate::config::Config;
use crate::models::{ChatMessage, MessageKind};
use crate::panel::{BellEvent, BellPanel, ChatCommand, ChatEvent, ChatOptions, ChatPanel};

fn open_channel(config: &Config) -> Arc<EventChannel> {
    Arc::new(EventChannel::new(Arc::new(SocketConnector::new(
        config.socket_url.clone(),
    ))))
}

/// The REST client, or `None` (with a warning) when it cannot be built.
fn optional_client(config: &Config) -> Option<Arc<MarketClient>> {
    match MarketClient::new(config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            eprintln!("Warning: {:#}", e);
            None
        }
    }
}

/// Print live notifications until Ctrl+C.
pub async fn listen() -> Result<()> {
    let config = Config::load()?;
    let user_id = config.require_identity()?.user_id.clone();
    let channel = open_channel(&config);
    let mut bell = BellPanel::mount(
        Arc::clone(&channel),
        optional_client(&config),
        user_id.clone(),
        config.timing.seen_capacity,
    );

    println!("Listening for notifications as {} (Ctrl+C to stop)...", user_id);
    let mut loaded = false;

    loop {
        tokio::select! {
            event = bell.recv() => {
                let Some(event) = event else { break };
                match event {
                    BellEvent::Snapshot(snapshot) if !snapshot.loading && !loaded => {
                        loaded = true;
                        println!("{} notification(s), {} unread", snapshot.items.len(), snapshot.unread);
                    }
                    BellEvent::Snapshot(snapshot) => {
                        tracing::debug!("{} unread", snapshot.unread);
                    }
                    BellEvent::Toast(toast) => println!("[{}] {}", toast.tone.label(), toast.text),
                    BellEvent::LoadFailed(text) => eprintln!("{}", text),
                    BellEvent::Connection(state) => println!("Event channel {}", state.as_str()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Shutting down...");
                break;
            }
        }
    }

    bell.unmount().await;
    channel.shutdown();
    Ok(())
}

/// Print messages not printed before, in view order.
fn print_new(view: &[ChatMessage], printed: &mut HashSet<String>) {
    for msg in view {
        if msg.is_temporary || msg.kind == MessageKind::Greeting {
            continue;
        }
        if printed.insert(msg.id.clone()) {
            println!("{}", msg.summary());
        }
    }
}

/// Interactive line chat: stdin lines are sent, the conversation is printed.
///
/// `/attach <path>` sends an image with the next line, `/refresh` reloads
/// history.
pub async fn chat(chat_id: Option<String>) -> Result<()> {
    let config = Config::load()?;
    let identity = config.require_identity()?.clone();
    let channel = open_channel(&config);
    let mut panel = ChatPanel::mount(
        Arc::clone(&channel),
        optional_client(&config),
        identity,
        ChatOptions::from_config(&config, chat_id),
    );

    println!("{}", ChatMessage::greeting().summary());
    println!("(type a message and press Enter; Ctrl+C to quit)");

    let mut printed = HashSet::new();
    let mut attachment: Option<PathBuf> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                let line = line.trim();
                if let Some(path) = line.strip_prefix("/attach ") {
                    attachment = Some(PathBuf::from(path.trim()));
                    println!("(image attached to next message)");
                } else if line == "/refresh" {
                    panel.send(ChatCommand::Refresh);
                } else if !line.is_empty() || attachment.is_some() {
                    panel.send(ChatCommand::Send {
                        text: line.to_string(),
                        image: attachment.take(),
                    });
                }
            }
            event = panel.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChatEvent::View(view) => print_new(&view, &mut printed),
                    ChatEvent::Alert(toast) => eprintln!("[{}] {}", toast.tone.label(), toast.text),
                    ChatEvent::HistoryError(text) => eprintln!("{}", text),
                    ChatEvent::ChatAdopted(id) => println!("(conversation {})", id),
                    ChatEvent::Connection(state) => tracing::info!("Event channel {}", state.as_str()),
                    ChatEvent::DraftCleared => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    panel.unmount().await;
    channel.shutdown();
    Ok(())
}

/// Send one message and wait for it to settle.
pub async fn send(chat_id: Option<String>, message: &str, image: Option<PathBuf>) -> Result<()> {
    if message.trim().is_empty() && image.is_none() {
        anyhow::bail!("Nothing to send: give a message or --image");
    }

    let config = Config::load()?;
    let identity = config.require_identity()?.clone();
    let channel = open_channel(&config);
    let client = MarketClient::new(&config)?;
    // Up before the send settles, so the confirmation is pushed live.
    if let Err(e) = channel.connect(&identity.user_id).await {
        eprintln!("Warning: event channel unavailable, message will not be pushed live: {:#}", e);
    }
    let mut panel = ChatPanel::mount(
        Arc::clone(&channel),
        Some(Arc::new(client)),
        identity,
        ChatOptions::from_config(&config, chat_id),
    );

    panel.send(ChatCommand::Send {
        text: message.to_string(),
        image,
    });

    let mut failure = None;
    while let Some(event) = panel.recv().await {
        match event {
            ChatEvent::Alert(toast) => failure = Some(toast.text),
            ChatEvent::ChatAdopted(id) => println!("Started conversation {}", id),
            ChatEvent::DraftCleared => break,
            _ => {}
        }
    }

    panel.unmount().await;
    channel.shutdown();
    match failure {
        Some(reason) => anyhow::bail!(reason),
        None => {
            println!("Message sent.");
            Ok(())
        }
    }
}

/// Open the event channel, emit the self-test event and report.
pub async fn ping() -> Result<()> {
    let config = Config::load()?;
    let identity = config.require_identity()?.clone();
    let channel = open_channel(&config);

    channel.connect(&identity.user_id).await?;
    println!("Event channel {} ({})", channel.state().as_str(), config.socket_url);

    channel.emit(
        names::CONNECTION_TEST,
        &json!({
            "userId": identity.user_id,
            "role": identity.role,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    )?;
    println!("Sent {} as {}", names::CONNECTION_TEST, identity.user_id);

    channel.shutdown();
    Ok(())
}
