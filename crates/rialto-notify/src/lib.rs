//! # rialto-notify
//!
//! Notification dispatch for the Rialto communication core: watches
//! unread-count deltas and emits one local event plus one best-effort
//! external push per new message the user has not seen.

pub mod dispatcher;
pub mod push;

pub use dispatcher::{NotificationDispatcher, NotificationEvent};
pub use push::{LogPush, PushError, PushSink};
