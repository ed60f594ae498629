use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = opaque id issued by the auth collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> String {
        self.0.chars().take(8).collect()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Conversation identity, derived from its two participants.
///
/// Both clients compute the same id locally before any round-trip, so a
/// conversation started from either side converges on one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Derive the id for an unordered pair of participants.
    ///
    /// Commutative: `for_pair(a, b) == for_pair(b, a)`. The two ids are
    /// sorted lexicographically and joined with `_`.
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
        Self(format!("{}_{}", lo.0, hi.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one call *attempt*.
///
/// Freshly allocated for every attempt and never reused, even for an
/// immediate redial on the same thread. All signaling data is partitioned
/// by this id, which makes envelopes from an abandoned attempt
/// structurally unreachable by the next one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string().chars().take(8).collect()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    /// Lowercase label used in system messages ("Missed video call").
    pub fn label(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which side of a call a party is on.
///
/// Assigned once at session creation and carried immutably; signal lanes
/// are keyed by the *producing* role, so a party always consumes the
/// opposite lane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    Caller,
    Callee,
}

impl Role {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Caller => Self::Callee,
            Self::Callee => Self::Caller,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Callee => "callee",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_is_commutative() {
        let a = UserId::from("alice");
        let b = UserId::from("bob");
        assert_eq!(ThreadId::for_pair(&a, &b), ThreadId::for_pair(&b, &a));
        assert_eq!(ThreadId::for_pair(&a, &b).as_str(), "alice_bob");
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn role_opposite() {
        assert_eq!(Role::Caller.opposite(), Role::Callee);
        assert_eq!(Role::Callee.opposite(), Role::Caller);
    }
}
