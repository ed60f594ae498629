//! # rialto-client
//!
//! Per-user façade over the Rialto communication core: messaging with
//! lazy thread creation, unread/focus bookkeeping, presence heartbeats,
//! the 1:1 call surface and notification dispatch, wired the way the
//! marketplace application consumes them.

pub mod client;
pub mod config;

pub use client::{ClientSession, CommsCore};
pub use config::CoreConfig;

// The full vocabulary a UI needs, re-exported from the core crates.
pub use rialto_call::{
    ActiveCall, CallError, CallSession, CallState, MediaSource, SimulatedMedia,
    SimulatedTransport, TransportFactory,
};
pub use rialto_notify::{LogPush, NotificationDispatcher, NotificationEvent, PushSink};
pub use rialto_shared::{CallType, Role, SessionId, ThreadId, UserId};
pub use rialto_store::{Message, ParticipantInfo, Profile, StoreError, ThreadState};
