//! Canonical data models and the normalisation of server payloads into them

mod chat;
mod notification;
pub mod wire;

pub use chat::*;
pub use notification::*;
