use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rialto_shared::{CallType, Role, SessionId, ThreadId, UserId};

/// Lifecycle of one call attempt.
///
/// ```text
/// Offering --(callee joins)--------> Connecting
/// Connecting --(both sides up)-----> Connected
/// Offering --(callee declines)-----> Declined   [terminal]
/// Offering --(caller gives up)-----> Missed     [terminal]
/// Connecting|Connected --(end)-----> Ended      [terminal]
/// Connected --(peer loss)----------> Ended      [terminal]
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CallState {
    /// Caller has placed the call; no callee signal yet.
    Offering,
    /// Callee accepted and both sides are exchanging signaling data.
    Connecting,
    /// The transport reported a live media path.
    Connected,
    /// Ended from `Connecting` or `Connected` by either party, or by
    /// transport peer loss.
    Ended,
    /// Callee explicitly refused while the call was still offering.
    Declined,
    /// Caller abandoned the call before the callee ever joined.
    Missed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Declined | Self::Missed)
    }

    /// Live = occupying the thread's active-call slot.
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offering => "offering",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ended => "ended",
            Self::Declined => "declined",
            Self::Missed => "missed",
        };
        f.write_str(s)
    }
}

/// One call attempt between the two participants of a thread.
///
/// The id is unique per attempt, never per thread: a redial gets a fresh
/// id so signaling from the abandoned attempt cannot leak into it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSession {
    pub id: SessionId,
    pub thread_id: ThreadId,
    pub caller: UserId,
    pub callee: UserId,
    pub call_type: CallType,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// The role `user` plays in this session, if any.
    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if user == &self.caller {
            Some(Role::Caller)
        } else if user == &self.callee {
            Some(Role::Callee)
        } else {
            None
        }
    }

    /// The party opposite `user`.
    pub fn peer_of(&self, user: &UserId) -> Option<&UserId> {
        match self.role_of(user)? {
            Role::Caller => Some(&self.callee),
            Role::Callee => Some(&self.caller),
        }
    }
}
