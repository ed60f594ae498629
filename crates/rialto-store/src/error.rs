use rialto_shared::{ThreadId, UserId};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The referenced thread has never been created.
    #[error("Thread not found: {0}")]
    ThreadNotFound(ThreadId),

    /// The acting user is not one of the thread's two participants.
    #[error("User {user} is not a participant of thread {thread}")]
    NotParticipant { user: UserId, thread: ThreadId },

    /// Message text exceeds the configured maximum length.
    #[error("Message exceeds {0} characters")]
    MessageTooLong(usize),

    /// The mutation could not be applied and left state unchanged.
    /// Safe to retry with the identical call.
    #[error("Thread mutation failed: {0}")]
    MutationFailed(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
