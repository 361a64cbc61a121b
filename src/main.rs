//! market-live - real-time notifications and support chat for the marketplace
//!
//! A terminal client that keeps a notification bell and a support
//! conversation in sync with the backend's REST API and event channel.

mod api;
mod auth;
mod channel;
mod config;
mod live;
mod models;
mod panel;
mod reconcile;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "market-live")]
#[command(about = "Real-time notification and support-chat client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the identity, access token and endpoints to use
    Init {
        /// Your user id
        user_id: String,

        /// Role sent with the connection self-test
        #[arg(long)]
        role: Option<String>,

        /// Bearer token for the REST API
        #[arg(long)]
        token: Option<String>,

        /// Token lifetime in seconds
        #[arg(long)]
        expires_in: Option<u64>,

        /// REST API base URL
        #[arg(long)]
        api_url: Option<String>,

        /// Event channel base URL
        #[arg(long)]
        socket_url: Option<String>,
    },

    /// Forget the stored identity and token
    Logout,

    /// Show current sign-in status
    Status,

    /// List notifications
    Notifications,

    /// Print live notifications until interrupted
    Listen,

    /// Print a page of a conversation's history
    History {
        /// Conversation id
        chat_id: String,

        /// Page to fetch (1 = newest)
        #[arg(short, long, default_value = "1")]
        page: u32,

        /// Messages per page
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Line-mode support chat on stdin/stdout
    Chat {
        /// Conversation id; omit to start a new conversation
        #[arg(short, long)]
        chat: Option<String>,
    },

    /// Send one message
    Send {
        /// Conversation id; omit to start a new conversation
        #[arg(short, long)]
        chat: Option<String>,

        /// Message content
        #[arg(default_value = "")]
        message: String,

        /// Image to attach
        #[arg(short, long)]
        image: Option<PathBuf>,
    },

    /// Open the event channel and emit the connection self-test
    Ping,

    /// Launch the terminal user interface
    Tui {
        /// Conversation id; omit to start a new conversation
        #[arg(short, long)]
        chat: Option<String>,
    },
}

fn init_logging(verbose: bool, to_file: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if to_file {
        // The terminal belongs to the UI; logs go to a file instead.
        let dir = config::Config::log_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let file = std::fs::File::create(dir.join("tui.log")).context("Failed to open log file")?;
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, matches!(cli.command, Commands::Tui { .. }))?;

    match cli.command {
        Commands::Init {
            user_id,
            role,
            token,
            expires_in,
            api_url,
            socket_url,
        } => {
            auth::init(auth::InitOptions {
                user_id,
                role,
                token,
                expires_in,
                api_url,
                socket_url,
            })
            .await?;
        }
        Commands::Logout => {
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Notifications => {
            tracing::info!("Fetching notifications...");
            api::list_notifications().await?;
        }
        Commands::Listen => {
            live::listen().await?;
        }
        Commands::History {
            chat_id,
            page,
            limit,
        } => {
            api::show_history(&chat_id, page, limit).await?;
        }
        Commands::Chat { chat } => {
            live::chat(chat).await?;
        }
        Commands::Send {
            chat,
            message,
            image,
        } => {
            tracing::info!("Sending message...");
            live::send(chat, &message, image).await?;
        }
        Commands::Ping => {
            live::ping().await?;
        }
        Commands::Tui { chat } => {
            let config = config::Config::load()?;
            tui::run(config, chat).await?;
        }
    }

    Ok(())
}
