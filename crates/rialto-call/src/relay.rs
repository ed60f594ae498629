//! Ordered, session-and-role-partitioned delivery of opaque signaling
//! payloads.
//!
//! Each session owns two independent lanes (caller→callee and
//! callee→caller). Within a lane delivery order is exactly send order;
//! across lanes there is no ordering, matching how the two sides produce
//! negotiation data independently. The relay never inspects payload
//! bytes; ordering is the only guarantee it owes callers.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use rialto_shared::constants::MAX_SIGNAL_PAYLOAD;
use rialto_shared::{Role, SessionId};

use crate::error::{CallError, Result};

/// One opaque unit of negotiation data. Immutable, append-only, never
/// readable across session boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    pub session_id: SessionId,
    /// The role that produced the payload; it is delivered to the other.
    pub producer: Role,
    /// Per-lane ordering key; ties in wall-clock time are broken by this
    /// insertion sequence.
    pub seq: u64,
    pub sent_at: DateTime<Utc>,
    pub payload: Bytes,
}

#[derive(Default)]
struct Lane {
    next_seq: u64,
    log: Vec<SignalEnvelope>,
    subs: Vec<mpsc::UnboundedSender<SignalEnvelope>>,
}

impl Lane {
    fn append(&mut self, envelope: SignalEnvelope) {
        self.log.push(envelope.clone());
        self.subs.retain(|tx| tx.send(envelope.clone()).is_ok());
    }
}

struct SessionLanes {
    open: bool,
    caller: Lane,
    callee: Lane,
}

impl SessionLanes {
    fn lane_mut(&mut self, producer: Role) -> &mut Lane {
        match producer {
            Role::Caller => &mut self.caller,
            Role::Callee => &mut self.callee,
        }
    }
}

/// Shared handle to the signal relay. Cheap to clone.
#[derive(Clone)]
pub struct SignalRelay {
    sessions: Arc<Mutex<HashMap<SessionId, SessionLanes>>>,
}

impl SignalRelay {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open both lanes for a freshly allocated session. Called by the
    /// coordinator exactly once per session id.
    pub(crate) async fn open(&self, session_id: SessionId) {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(session_id).or_insert_with(|| SessionLanes {
            open: true,
            caller: Lane::default(),
            callee: Lane::default(),
        });
        debug!(session = %session_id.short(), "Signal lanes opened");
    }

    /// Close both lanes. Subscribers drain what was already sent, then
    /// terminate; any later send fails with `SessionClosed`.
    pub(crate) async fn close(&self, session_id: SessionId) {
        let mut sessions = self.sessions.lock().await;
        if let Some(lanes) = sessions.get_mut(&session_id) {
            if lanes.open {
                lanes.open = false;
                lanes.caller.subs.clear();
                lanes.callee.subs.clear();
                debug!(session = %session_id.short(), "Signal lanes closed");
            }
        }
    }

    /// Append one payload to the `(session, producer)` lane.
    pub async fn send(
        &self,
        session_id: SessionId,
        producer: Role,
        payload: Bytes,
    ) -> Result<SignalEnvelope> {
        if payload.len() > MAX_SIGNAL_PAYLOAD {
            return Err(CallError::PayloadTooLarge(payload.len()));
        }

        let mut sessions = self.sessions.lock().await;
        let lanes = sessions
            .get_mut(&session_id)
            .filter(|l| l.open)
            .ok_or(CallError::SessionClosed)?;

        let lane = lanes.lane_mut(producer);
        let envelope = SignalEnvelope {
            session_id,
            producer,
            seq: lane.next_seq,
            sent_at: Utc::now(),
            payload,
        };
        lane.next_seq += 1;
        lane.append(envelope.clone());

        trace!(
            session = %session_id.short(),
            producer = %producer,
            seq = envelope.seq,
            bytes = envelope.payload.len(),
            "Signal relayed"
        );
        Ok(envelope)
    }

    /// Subscribe to the payloads the *other* role produces: the existing
    /// backlog in order, then live envelopes, gap-free. The stream ends
    /// when the session closes; dropping it releases only this
    /// subscriber.
    pub async fn subscribe(&self, session_id: SessionId, consumer: Role) -> Result<SignalStream> {
        let mut sessions = self.sessions.lock().await;
        let lanes = sessions
            .get_mut(&session_id)
            .filter(|l| l.open)
            .ok_or(CallError::SessionClosed)?;

        let lane = lanes.lane_mut(consumer.opposite());
        let (tx, rx) = mpsc::unbounded_channel();
        for envelope in &lane.log {
            // Receiver is still in scope, send cannot fail here.
            let _ = tx.send(envelope.clone());
        }
        lane.subs.push(tx);
        Ok(SignalStream { rx })
    }

    /// Whether the session's lanes are still accepting traffic.
    pub async fn is_open(&self, session_id: SessionId) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(&session_id).map(|l| l.open).unwrap_or(false)
    }
}

impl Default for SignalRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered subscription to one lane of one session.
#[derive(Debug)]
pub struct SignalStream {
    rx: mpsc::UnboundedReceiver<SignalEnvelope>,
}

impl SignalStream {
    /// Next envelope in send order; `None` once the session has closed
    /// and the backlog is drained.
    pub async fn next(&mut self) -> Option<SignalEnvelope> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lanes_are_ordered_and_partitioned_by_role() {
        let relay = SignalRelay::new();
        let sid = SessionId::new();
        relay.open(sid).await;

        relay
            .send(sid, Role::Caller, Bytes::from_static(b"offer"))
            .await
            .unwrap();
        relay
            .send(sid, Role::Callee, Bytes::from_static(b"answer"))
            .await
            .unwrap();
        relay
            .send(sid, Role::Caller, Bytes::from_static(b"ice-1"))
            .await
            .unwrap();

        // The callee consumes only what the caller produced, in order.
        let mut stream = relay.subscribe(sid, Role::Callee).await.unwrap();
        assert_eq!(stream.next().await.unwrap().payload, "offer");
        let second = stream.next().await.unwrap();
        assert_eq!(second.payload, "ice-1");
        assert_eq!(second.seq, 1);
    }

    #[tokio::test]
    async fn subscribe_replays_backlog_then_live() {
        let relay = SignalRelay::new();
        let sid = SessionId::new();
        relay.open(sid).await;

        relay
            .send(sid, Role::Caller, Bytes::from_static(b"early"))
            .await
            .unwrap();
        let mut stream = relay.subscribe(sid, Role::Callee).await.unwrap();
        relay
            .send(sid, Role::Caller, Bytes::from_static(b"late"))
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().payload, "early");
        assert_eq!(stream.next().await.unwrap().payload, "late");
    }

    #[tokio::test]
    async fn closed_session_rejects_sends_and_ends_streams() {
        let relay = SignalRelay::new();
        let sid = SessionId::new();
        relay.open(sid).await;

        relay
            .send(sid, Role::Caller, Bytes::from_static(b"offer"))
            .await
            .unwrap();
        let mut stream = relay.subscribe(sid, Role::Callee).await.unwrap();

        relay.close(sid).await;

        let err = relay
            .send(sid, Role::Caller, Bytes::from_static(b"too late"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::SessionClosed));

        // In-flight data drains, then the stream terminates.
        assert_eq!(stream.next().await.unwrap().payload, "offer");
        assert!(stream.next().await.is_none());

        let err = relay.subscribe(sid, Role::Callee).await.unwrap_err();
        assert!(matches!(err, CallError::SessionClosed));
    }

    #[tokio::test]
    async fn unknown_session_is_closed() {
        let relay = SignalRelay::new();
        let err = relay
            .send(SessionId::new(), Role::Caller, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::SessionClosed));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let relay = SignalRelay::new();
        let sid = SessionId::new();
        relay.open(sid).await;

        let big = Bytes::from(vec![0u8; MAX_SIGNAL_PAYLOAD + 1]);
        let err = relay.send(sid, Role::Caller, big).await.unwrap_err();
        assert!(matches!(err, CallError::PayloadTooLarge(_)));
    }

    #[tokio::test]
    async fn dropping_one_subscriber_leaves_others() {
        let relay = SignalRelay::new();
        let sid = SessionId::new();
        relay.open(sid).await;

        let dropped = relay.subscribe(sid, Role::Callee).await.unwrap();
        let mut kept = relay.subscribe(sid, Role::Callee).await.unwrap();
        drop(dropped);

        relay
            .send(sid, Role::Caller, Bytes::from_static(b"still here"))
            .await
            .unwrap();
        assert_eq!(kept.next().await.unwrap().payload, "still here");
    }
}
