//! Domain model structs for the communication store.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rialto_shared::{ThreadId, UserId};

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// A user's presence document. Written only by the owning client's
/// heartbeat; read by any peer sharing a thread with them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    /// Reference to an avatar image held by the (external) image host.
    pub avatar_ref: Option<String>,
    /// Updated by the periodic heartbeat; staleness drives the online flag.
    pub last_active_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Participant snapshot
// ---------------------------------------------------------------------------

/// Display metadata snapshotted into a thread at creation time.
///
/// The first writer's snapshot wins and is never overwritten, so both
/// sides render stable names even if a profile changes later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

impl ParticipantInfo {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }
}

impl From<UserId> for ParticipantInfo {
    fn from(user_id: UserId) -> Self {
        let display_name = user_id.to_string();
        Self {
            user_id,
            display_name,
            avatar_ref: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// Snapshot of one 1:1 conversation document, as published to subscribers
/// after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadState {
    pub id: ThreadId,
    /// The two participants, sorted (same order the id is derived from).
    pub participants: [UserId; 2],
    /// Display snapshots aligned with `participants`.
    pub participant_info: [ParticipantInfo; 2],
    /// Per-participant unread counters; exactly one entry per participant.
    pub unread: HashMap<UserId, u64>,
    pub last_message: Option<String>,
    pub last_message_sender: Option<UserId>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// The marketplace listing this conversation started from, if any.
    pub listing_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ThreadState {
    /// The participant other than `user`, if `user` is a participant.
    pub fn other_participant(&self, user: &UserId) -> Option<&UserId> {
        match &self.participants {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.iter().any(|p| p == user)
    }

    pub fn info_for(&self, user: &UserId) -> Option<&ParticipantInfo> {
        self.participant_info.iter().find(|i| &i.user_id == user)
    }

    pub fn unread_for(&self, user: &UserId) -> u64 {
        self.unread.get(user).copied().unwrap_or(0)
    }

    /// Ordering key for conversation lists: last activity, falling back
    /// to creation time for threads with no messages yet.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One entry of a thread's append-only message log. Immutable once
/// created; `seq` is the strictly increasing per-thread ordering key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: ThreadId,
    pub sender: UserId,
    pub text: String,
    pub seq: u64,
    pub sent_at: DateTime<Utc>,
    /// System-generated notices (e.g. missed-call entries) rather than
    /// user-typed text.
    pub is_system: bool,
}
