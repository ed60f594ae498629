use rialto_shared::UserId;
use thiserror::Error;
use tracing::info;

/// Errors from the external push sink. Logged by the dispatcher and
/// otherwise ignored; never retried.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Push rejected: {0}")]
    Rejected(String),

    #[error("Push sink unavailable")]
    Unavailable,
}

/// Best-effort external push delivery (fire-and-forget).
pub trait PushSink: Send + Sync {
    fn push(&self, user: &UserId, title: &str, body: &str) -> Result<(), PushError>;
}

/// Sink that only logs, for environments without a push provider.
#[derive(Default)]
pub struct LogPush;

impl PushSink for LogPush {
    fn push(&self, user: &UserId, title: &str, body: &str) -> Result<(), PushError> {
        info!(user = %user.short(), title, body, "Push (log only)");
        Ok(())
    }
}
