use rialto_shared::SessionId;
use rialto_store::StoreError;
use thiserror::Error;

/// Errors produced by the call coordination layer.
///
/// None of these are fatal: each is scoped to one operation and leaves
/// prior call and thread state intact.
#[derive(Error, Debug)]
pub enum CallError {
    /// The thread's active-call slot is occupied by a live session.
    /// Recoverable; the caller should inform the user.
    #[error("Thread already has an active call")]
    AlreadyInCall,

    /// The referenced session is no longer the thread's current one.
    /// The holder must discard the reference, never retry with it.
    #[error("Session is not the thread's current call")]
    StaleSession,

    /// A signal was sent or awaited after the session terminated.
    /// Recoverable; drop the payload.
    #[error("Session has ended, signal channel closed")]
    SessionClosed,

    /// No session with this id was ever created.
    #[error("Unknown call session: {0}")]
    UnknownSession(SessionId),

    /// A callee-only operation (join, decline) attempted by another user.
    #[error("Operation is restricted to the session's callee")]
    NotCallee,

    /// The acting user is neither caller nor callee of the session.
    #[error("User is not a party of this call")]
    NotParty,

    /// The requested state change is not in the session state machine.
    #[error("Invalid call state transition: {0}")]
    InvalidTransition(&'static str),

    /// One opaque signaling payload exceeds the relay's size cap.
    #[error("Signal payload of {0} bytes exceeds the maximum")]
    PayloadTooLarge(usize),

    /// Local capture devices could not be acquired.
    #[error("Media acquisition failed: {0}")]
    MediaUnavailable(String),

    /// Thread bookkeeping behind a call operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CallError>;
