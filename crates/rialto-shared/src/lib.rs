//! # rialto-shared
//!
//! Identity newtypes, call vocabulary and tuning constants shared by every
//! crate of the Rialto communication core.

pub mod constants;
pub mod types;

pub use types::{CallType, Role, SessionId, ThreadId, UserId};
