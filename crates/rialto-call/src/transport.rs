//! Seams for the two external call capabilities: local media capture and
//! the opaque peer transport.
//!
//! The core never touches media bytes or interprets signaling payloads;
//! it only moves payloads between a transport and the relay and releases
//! everything on teardown. `SimulatedTransport` and `SimulatedMedia`
//! script the handshake in-process for tests and the demo binary.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use rialto_shared::{CallType, Role};

use crate::error::{CallError, Result};

/// What a transport reports back while negotiating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An outbound opaque payload to relay to the peer.
    Signal(Bytes),
    /// A live media path exists.
    Connected,
    /// The peer vanished (network loss, crash).
    PeerLost,
    /// Negotiation failed locally.
    Failed(String),
}

/// Handle to one side's negotiation attempt. `close` is idempotent.
pub trait TransportControl: Send {
    /// Feed one inbound payload produced by the peer.
    fn feed_signal(&mut self, payload: Bytes);

    fn close(&mut self);
}

/// The opaque transport capability (WebRTC or equivalent).
pub trait TransportFactory: Send + Sync {
    /// Begin a negotiation attempt. Outbound payloads and status changes
    /// arrive on `events`; inbound payloads are pushed into the returned
    /// control.
    fn connect(
        &self,
        role: Role,
        call_type: CallType,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn TransportControl>;
}

/// Acquired local capture devices. `release` is idempotent and must be
/// reached from every terminal path of the owning call.
pub trait MediaHandle: Send {
    fn set_muted(&mut self, muted: bool);
    fn set_video_enabled(&mut self, enabled: bool);
    fn release(&mut self);
}

/// Local media capture capability.
pub trait MediaSource: Send + Sync {
    fn acquire(&self, call_type: CallType) -> Result<Box<dyn MediaHandle>>;
}

// ---------------------------------------------------------------------------
// Simulated transport
// ---------------------------------------------------------------------------

/// In-process transport scripting a minimal offer/answer/candidate
/// handshake. The payloads are opaque to the core either way; these are
/// just recognizable markers.
pub const SIM_OFFER: &[u8] = b"sim:offer";
pub const SIM_ANSWER: &[u8] = b"sim:answer";
pub const SIM_CANDIDATE: &[u8] = b"sim:candidate";

#[derive(Default)]
pub struct SimulatedTransport;

impl SimulatedTransport {
    pub fn new() -> Self {
        Self
    }
}

impl TransportFactory for SimulatedTransport {
    fn connect(
        &self,
        role: Role,
        call_type: CallType,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn TransportControl> {
        debug!(role = %role, kind = %call_type, "Simulated transport connecting");
        if role == Role::Caller {
            let _ = events.send(TransportEvent::Signal(Bytes::from_static(SIM_OFFER)));
            let _ = events.send(TransportEvent::Signal(Bytes::from_static(SIM_CANDIDATE)));
        }
        Box::new(SimulatedControl {
            role,
            events,
            closed: false,
        })
    }
}

struct SimulatedControl {
    role: Role,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: bool,
}

impl TransportControl for SimulatedControl {
    fn feed_signal(&mut self, payload: Bytes) {
        if self.closed {
            return;
        }
        match (self.role, payload.as_ref()) {
            (Role::Callee, p) if p == SIM_OFFER => {
                let _ = self
                    .events
                    .send(TransportEvent::Signal(Bytes::from_static(SIM_ANSWER)));
                let _ = self
                    .events
                    .send(TransportEvent::Signal(Bytes::from_static(SIM_CANDIDATE)));
                let _ = self.events.send(TransportEvent::Connected);
            }
            (Role::Caller, p) if p == SIM_ANSWER => {
                let _ = self.events.send(TransportEvent::Connected);
            }
            // Candidates and anything else are absorbed silently.
            _ => {}
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(role = %self.role, "Simulated transport closed");
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated media
// ---------------------------------------------------------------------------

/// In-process capture stand-in that counts live handles, so tests can
/// assert release on every exit path.
#[derive(Clone, Default)]
pub struct SimulatedMedia {
    live: Arc<AtomicUsize>,
    deny: Arc<AtomicBool>,
}

impl SimulatedMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles acquired and not yet released.
    pub fn live_handles(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Make subsequent acquisitions fail (camera in use, no permission).
    pub fn deny_acquisition(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }
}

impl MediaSource for SimulatedMedia {
    fn acquire(&self, call_type: CallType) -> Result<Box<dyn MediaHandle>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CallError::MediaUnavailable("capture denied".into()));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        debug!(kind = %call_type, "Simulated media acquired");
        Ok(Box::new(SimulatedMediaHandle {
            live: self.live.clone(),
            released: false,
            muted: false,
            video_enabled: call_type == CallType::Video,
        }))
    }
}

struct SimulatedMediaHandle {
    live: Arc<AtomicUsize>,
    released: bool,
    muted: bool,
    video_enabled: bool,
}

impl MediaHandle for SimulatedMediaHandle {
    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        debug!(muted = self.muted, "Simulated media mute toggled");
    }

    fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
        debug!(enabled = self.video_enabled, "Simulated media video toggled");
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
            debug!("Simulated media released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_handshake_connects_both_sides() {
        let factory = SimulatedTransport::new();
        let (caller_tx, mut caller_rx) = mpsc::unbounded_channel();
        let (callee_tx, mut callee_rx) = mpsc::unbounded_channel();

        let mut caller = factory.connect(Role::Caller, CallType::Audio, caller_tx);
        let mut callee = factory.connect(Role::Callee, CallType::Audio, callee_tx);

        // Caller emits its offer and a candidate on connect.
        let offer = match caller_rx.recv().await.unwrap() {
            TransportEvent::Signal(p) => p,
            other => panic!("expected offer, got {other:?}"),
        };
        let candidate = caller_rx.recv().await.unwrap();
        assert!(matches!(candidate, TransportEvent::Signal(_)));

        callee.feed_signal(offer);
        let answer = match callee_rx.recv().await.unwrap() {
            TransportEvent::Signal(p) => p,
            other => panic!("expected answer, got {other:?}"),
        };
        assert!(matches!(
            callee_rx.recv().await.unwrap(),
            TransportEvent::Signal(_)
        ));
        assert_eq!(callee_rx.recv().await.unwrap(), TransportEvent::Connected);

        caller.feed_signal(answer);
        assert_eq!(caller_rx.recv().await.unwrap(), TransportEvent::Connected);
    }

    #[tokio::test]
    async fn closed_transport_ignores_signals() {
        let factory = SimulatedTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut control = factory.connect(Role::Callee, CallType::Audio, tx);

        control.close();
        control.close();
        control.feed_signal(Bytes::from_static(SIM_OFFER));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn media_release_is_idempotent() {
        let media = SimulatedMedia::new();
        let mut handle = media.acquire(CallType::Video).unwrap();
        assert_eq!(media.live_handles(), 1);

        handle.release();
        handle.release();
        assert_eq!(media.live_handles(), 0);
    }

    #[test]
    fn denied_media_surfaces_error() {
        let media = SimulatedMedia::new();
        media.deny_acquisition(true);
        assert!(matches!(
            media.acquire(CallType::Audio),
            Err(CallError::MediaUnavailable(_))
        ));
    }
}
