//! # rialto-store
//!
//! Conversation state for the Rialto communication core: deterministic
//! thread identity, append-only message logs, atomic unread counters and
//! best-effort presence.
//!
//! The durable document store of the surrounding application is an
//! external collaborator; this crate provides the same primitives
//! (commutative increment, conditional write, change subscription)
//! in-process so the rest of the core is written against them.

pub mod models;
pub mod presence;
pub mod threads;

mod error;

pub use error::{Result, StoreError};
pub use models::*;
pub use presence::{
    is_online, spawn_default_heartbeat, spawn_heartbeat, HeartbeatTask, PresenceTracker,
};
pub use threads::{MessageFeed, ThreadEvents, ThreadStore, ThreadWatch};
