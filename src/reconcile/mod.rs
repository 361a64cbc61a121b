//! Client-side reconciliation of live events with fetched state
//!
//! Pure state machines: no I/O, no timers. The panels own these and feed them
//! from the event channel and the REST API.

pub mod alert;
pub mod chat;
pub mod notifications;
pub mod seen;

pub use alert::{Toast, Tone};
pub use chat::{ChatReconciler, ChatSettings, FollowUp, Outgoing};
pub use notifications::{NotificationReconciler, Phase};
