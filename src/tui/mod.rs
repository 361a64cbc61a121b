//! TUI module for market-live
//!
//! Terminal user interface using Ratatui: the support conversation with a
//! compose line, plus the notification bell.

mod app;
mod bell;
mod compose;
mod conversation;
mod ui;

pub use app::run;
