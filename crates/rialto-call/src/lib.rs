//! # rialto-call
//!
//! Call-session coordination for the Rialto communication core: a state
//! machine per call attempt, a singleton active-call slot per thread,
//! ordered session-scoped signal relaying, and scoped ownership of the
//! media/transport resources a live call holds.

pub mod active;
pub mod coordinator;
pub mod relay;
pub mod session;
pub mod transport;

mod error;

pub use active::ActiveCall;
pub use coordinator::CallCoordinator;
pub use error::{CallError, Result};
pub use relay::{SignalEnvelope, SignalRelay, SignalStream};
pub use session::{CallSession, CallState};
pub use transport::{
    MediaHandle, MediaSource, SimulatedMedia, SimulatedTransport, TransportControl,
    TransportEvent, TransportFactory,
};
