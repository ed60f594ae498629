//! Call session coordination: one state machine per call attempt and a
//! singleton active-call slot per thread.
//!
//! The slot is the only arbiter of "who is in a call here". It is
//! mutated with compare-and-swap semantics keyed by session id, so a
//! slow or stale `end_call` can never clobber a newer call that has
//! since taken the slot, and a redial always gets a fresh session id
//! whose signaling lanes are disjoint from the abandoned attempt's.
//!
//! Lock order is coordinator → relay → thread store; no component ever
//! takes them the other way around.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use rialto_shared::{CallType, SessionId, ThreadId, UserId};
use rialto_store::ThreadStore;

use crate::error::{CallError, Result};
use crate::relay::SignalRelay;
use crate::session::{CallSession, CallState};

struct SessionEntry {
    session: CallSession,
    state_tx: watch::Sender<CallState>,
}

#[derive(Default)]
struct CoordinatorInner {
    /// Active-call slot: at most one live session id per thread.
    slots: HashMap<ThreadId, SessionId>,
    /// Per-thread feed of the slot's occupant, for incoming-call UIs.
    slot_txs: HashMap<ThreadId, watch::Sender<Option<CallSession>>>,
    /// Every session ever created, terminal ones included.
    sessions: HashMap<SessionId, SessionEntry>,
}

impl CoordinatorInner {
    fn notify_slot(&mut self, thread_id: &ThreadId, occupant: Option<CallSession>) {
        let tx = self
            .slot_txs
            .entry(thread_id.clone())
            .or_insert_with(|| watch::channel(None).0);
        let _ = tx.send_replace(occupant);
    }
}

/// Shared handle to the call coordinator. Cheap to clone.
#[derive(Clone)]
pub struct CallCoordinator {
    threads: ThreadStore,
    relay: SignalRelay,
    inner: Arc<Mutex<CoordinatorInner>>,
}

impl CallCoordinator {
    pub fn new(threads: ThreadStore) -> Self {
        Self {
            threads,
            relay: SignalRelay::new(),
            inner: Arc::new(Mutex::new(CoordinatorInner::default())),
        }
    }

    /// The relay carrying this coordinator's signaling traffic.
    pub fn relay(&self) -> SignalRelay {
        self.relay.clone()
    }

    /// Place a call on a thread.
    ///
    /// Fails with `AlreadyInCall` while the thread's slot holds a live
    /// session. Otherwise allocates a fresh session id (never reused,
    /// even for an immediate redial), installs it in the slot, opens its
    /// signal lanes and returns the session in `Offering` state so the
    /// caller can begin producing signaling payloads against it.
    pub async fn start_call(
        &self,
        thread_id: &ThreadId,
        caller: &UserId,
        callee: &UserId,
        call_type: CallType,
    ) -> Result<CallSession> {
        // The conversation must exist and the parties must be its two
        // participants; calls never create threads.
        let thread = self.threads.thread(thread_id).await?;
        for user in [caller, callee] {
            if !thread.is_participant(user) {
                return Err(CallError::Store(rialto_store::StoreError::NotParticipant {
                    user: user.clone(),
                    thread: thread_id.clone(),
                }));
            }
        }

        let mut inner = self.inner.lock().await;

        if let Some(current) = inner.slots.get(thread_id) {
            let live = inner
                .sessions
                .get(current)
                .map(|e| e.session.state.is_live())
                .unwrap_or(false);
            if live {
                return Err(CallError::AlreadyInCall);
            }
        }

        let session = CallSession {
            id: SessionId::new(),
            thread_id: thread_id.clone(),
            caller: caller.clone(),
            callee: callee.clone(),
            call_type,
            state: CallState::Offering,
            created_at: Utc::now(),
            ended_at: None,
        };

        self.relay.open(session.id).await;

        let (state_tx, _) = watch::channel(CallState::Offering);
        inner.sessions.insert(
            session.id,
            SessionEntry {
                session: session.clone(),
                state_tx,
            },
        );
        inner.slots.insert(thread_id.clone(), session.id);
        inner.notify_slot(thread_id, Some(session.clone()));

        info!(
            session = %session.id.short(),
            thread = %thread_id,
            caller = %caller.short(),
            kind = %call_type,
            "Call started"
        );
        Ok(session)
    }

    /// Callee accepts: `Offering → Connecting`.
    ///
    /// Fails with `StaleSession` if the session is no longer the
    /// thread's current one (the caller already abandoned or redialed);
    /// the holder must discard the reference on this error. Accepting a
    /// session that is already connecting or connected is a no-op, so a
    /// duplicated accept cannot fail a live call.
    pub async fn join_call(&self, session_id: SessionId, callee: &UserId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;

        let entry = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CallError::UnknownSession(session_id))?;
        if &entry.session.callee != callee {
            return Err(CallError::NotCallee);
        }
        if inner.slots.get(&entry.session.thread_id) != Some(&session_id) {
            return Err(CallError::StaleSession);
        }

        match entry.session.state {
            CallState::Offering => {
                entry.session.state = CallState::Connecting;
                let _ = entry.state_tx.send_replace(CallState::Connecting);
                let thread_id = entry.session.thread_id.clone();
                let occupant = entry.session.clone();
                inner.notify_slot(&thread_id, Some(occupant));
                info!(session = %session_id.short(), "Callee joined");
                Ok(())
            }
            CallState::Connecting | CallState::Connected => Ok(()),
            // Terminal yet still in the slot cannot happen; the slot is
            // cleared in the same critical section as the transition.
            _ => Err(CallError::StaleSession),
        }
    }

    /// Transport reported a live media path: `Connecting → Connected`.
    /// Idempotent once connected.
    pub async fn mark_connected(&self, session_id: SessionId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CallError::UnknownSession(session_id))?;

        match entry.session.state {
            CallState::Connecting => {
                entry.session.state = CallState::Connected;
                let _ = entry.state_tx.send_replace(CallState::Connected);
                info!(session = %session_id.short(), "Call connected");
                Ok(())
            }
            CallState::Connected => Ok(()),
            CallState::Offering => Err(CallError::InvalidTransition(
                "connected before callee joined",
            )),
            _ => Err(CallError::SessionClosed),
        }
    }

    /// Terminate from any live state.
    ///
    /// A caller hanging up while the call is still `Offering` is a
    /// **missed call**: a system message lands in the thread and the
    /// callee's unread counter increments (the coordinator's one write
    /// into the thread model). Ending an already-terminal session is a
    /// no-op returning the settled state, so racing hangups from both
    /// ends never double-fire the bookkeeping.
    pub async fn end_call(&self, session_id: SessionId, ended_by: &UserId) -> Result<CallState> {
        let (state, missed_notice) = {
            let mut inner = self.inner.lock().await;
            let inner = &mut *inner;

            let entry = inner
                .sessions
                .get_mut(&session_id)
                .ok_or(CallError::UnknownSession(session_id))?;
            let session = &mut entry.session;

            if session.role_of(ended_by).is_none() {
                return Err(CallError::NotParty);
            }
            if session.state.is_terminal() {
                return Ok(session.state);
            }

            let missed = session.state == CallState::Offering && ended_by == &session.caller;
            session.state = if missed {
                CallState::Missed
            } else {
                CallState::Ended
            };
            session.ended_at = Some(Utc::now());
            let _ = entry.state_tx.send_replace(session.state);

            let state = session.state;
            let thread_id = session.thread_id.clone();
            let caller = session.caller.clone();
            let call_type = session.call_type;

            // Clear the slot only if this session still owns it.
            if inner.slots.get(&thread_id) == Some(&session_id) {
                inner.slots.remove(&thread_id);
                inner.notify_slot(&thread_id, None);
            }

            self.relay.close(session_id).await;

            info!(
                session = %session_id.short(),
                ended_by = %ended_by.short(),
                outcome = %state,
                "Call terminated"
            );

            let notice = missed.then(|| (thread_id, caller, call_type));
            (state, notice)
        };

        if let Some((thread_id, caller, call_type)) = missed_notice {
            let text = format!("Missed {} call", call_type.label());
            if let Err(e) = self
                .threads
                .append_system_message(&thread_id, &caller, &text)
                .await
            {
                // The call is already settled; the notice is best-effort.
                warn!(
                    session = %session_id.short(),
                    error = %e,
                    "Failed to record missed call"
                );
            }
        }

        Ok(state)
    }

    /// Callee refuses an offering call: `Offering → Declined`.
    ///
    /// Clears the slot and closes the lanes but appends no missed-call
    /// message: declining is distinct from missing. No-op on an
    /// already-terminal session.
    pub async fn decline_call(&self, session_id: SessionId, by: &UserId) -> Result<CallState> {
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;

        let entry = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(CallError::UnknownSession(session_id))?;
        if &entry.session.callee != by {
            return Err(CallError::NotCallee);
        }

        match entry.session.state {
            state if state.is_terminal() => Ok(state),
            CallState::Offering => {
                entry.session.state = CallState::Declined;
                entry.session.ended_at = Some(Utc::now());
                let _ = entry.state_tx.send_replace(CallState::Declined);

                let thread_id = entry.session.thread_id.clone();
                if inner.slots.get(&thread_id) == Some(&session_id) {
                    inner.slots.remove(&thread_id);
                    inner.notify_slot(&thread_id, None);
                }
                self.relay.close(session_id).await;

                info!(session = %session_id.short(), "Call declined");
                Ok(CallState::Declined)
            }
            _ => Err(CallError::InvalidTransition("decline after joining")),
        }
    }

    /// Snapshot of one session.
    pub async fn session(&self, session_id: SessionId) -> Result<CallSession> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(&session_id)
            .map(|e| e.session.clone())
            .ok_or(CallError::UnknownSession(session_id))
    }

    /// The live session currently holding the thread's slot, if any.
    pub async fn active_session(&self, thread_id: &ThreadId) -> Option<CallSession> {
        let inner = self.inner.lock().await;
        let id = inner.slots.get(thread_id)?;
        inner.sessions.get(id).map(|e| e.session.clone())
    }

    /// Observe a session's state transitions. The receiver always holds
    /// the latest state.
    pub async fn subscribe(&self, session_id: SessionId) -> Result<watch::Receiver<CallState>> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(&session_id)
            .map(|e| e.state_tx.subscribe())
            .ok_or(CallError::UnknownSession(session_id))
    }

    /// Observe the thread's active-call slot: `Some` while a call is
    /// offering/connecting/connected, `None` otherwise. This is how a
    /// callee learns of an incoming call.
    pub async fn watch_thread(&self, thread_id: &ThreadId) -> watch::Receiver<Option<CallSession>> {
        let mut inner = self.inner.lock().await;
        let current = inner
            .slots
            .get(thread_id)
            .and_then(|id| inner.sessions.get(id))
            .map(|e| e.session.clone());
        inner
            .slot_txs
            .entry(thread_id.clone())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rialto_shared::Role;
    use rialto_store::{ParticipantInfo, StoreError};

    async fn setup() -> (ThreadStore, CallCoordinator, ThreadId, UserId, UserId) {
        let store = ThreadStore::new();
        let a = ParticipantInfo::new("alice", "Alice");
        let b = ParticipantInfo::new("bob", "Bob");
        let thread_id = ThreadId::for_pair(&a.user_id, &b.user_id);
        store
            .ensure_thread(&thread_id, a.clone(), b.clone(), None)
            .await
            .unwrap();
        let coordinator = CallCoordinator::new(store.clone());
        (store, coordinator, thread_id, a.user_id, b.user_id)
    }

    #[tokio::test]
    async fn slot_is_exclusive_until_terminal() {
        let (_store, calls, thread_id, alice, bob) = setup().await;

        let s1 = calls
            .start_call(&thread_id, &alice, &bob, CallType::Audio)
            .await
            .unwrap();

        // Re-entrant attempt (same or either party) is refused while the
        // slot is live, even though s1 was never answered.
        let err = calls
            .start_call(&thread_id, &alice, &bob, CallType::Audio)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::AlreadyInCall));

        calls.end_call(s1.id, &alice).await.unwrap();
        let s2 = calls
            .start_call(&thread_id, &alice, &bob, CallType::Audio)
            .await
            .unwrap();
        assert_ne!(s1.id, s2.id);
    }

    #[tokio::test]
    async fn stale_session_is_rejected_everywhere() {
        let (_store, calls, thread_id, alice, bob) = setup().await;

        let s1 = calls
            .start_call(&thread_id, &alice, &bob, CallType::Video)
            .await
            .unwrap();
        calls.end_call(s1.id, &alice).await.unwrap();
        let s2 = calls
            .start_call(&thread_id, &alice, &bob, CallType::Video)
            .await
            .unwrap();

        // A callee still holding s1 must discard it, not retry.
        let err = calls.join_call(s1.id, &bob).await.unwrap_err();
        assert!(matches!(err, CallError::StaleSession));

        // s1's lanes are gone for good; s2's are untouched.
        let relay = calls.relay();
        let err = relay
            .send(s1.id, Role::Caller, Bytes::from_static(b"ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::SessionClosed));
        relay
            .send(s2.id, Role::Caller, Bytes::from_static(b"fresh"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn caller_abandoning_offer_is_a_missed_call() {
        let (store, calls, thread_id, alice, bob) = setup().await;

        let session = calls
            .start_call(&thread_id, &alice, &bob, CallType::Video)
            .await
            .unwrap();
        let state = calls.end_call(session.id, &alice).await.unwrap();
        assert_eq!(state, CallState::Missed);

        let log = store.messages(&thread_id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].is_system);
        assert_eq!(log[0].text, "Missed video call");
        assert_eq!(log[0].sender, alice);

        let thread = store.thread(&thread_id).await.unwrap();
        assert_eq!(thread.unread_for(&bob), 1);
        assert_eq!(thread.unread_for(&alice), 0);
    }

    #[tokio::test]
    async fn racing_hangups_fire_bookkeeping_once() {
        let (store, calls, thread_id, alice, bob) = setup().await;

        let session = calls
            .start_call(&thread_id, &alice, &bob, CallType::Audio)
            .await
            .unwrap();

        let (r1, r2) = tokio::join!(
            calls.end_call(session.id, &alice),
            calls.end_call(session.id, &alice),
        );
        assert_eq!(r1.unwrap(), CallState::Missed);
        assert_eq!(r2.unwrap(), CallState::Missed);

        assert_eq!(store.messages(&thread_id).await.unwrap().len(), 1);
        assert_eq!(store.total_unread(&bob).await, 1);
    }

    #[tokio::test]
    async fn callee_ending_an_offer_is_not_missed() {
        let (store, calls, thread_id, alice, bob) = setup().await;

        let session = calls
            .start_call(&thread_id, &alice, &bob, CallType::Audio)
            .await
            .unwrap();
        let state = calls.end_call(session.id, &bob).await.unwrap();
        assert_eq!(state, CallState::Ended);
        assert!(store.messages(&thread_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decline_is_distinct_from_missed() {
        let (store, calls, thread_id, alice, bob) = setup().await;

        let session = calls
            .start_call(&thread_id, &alice, &bob, CallType::Video)
            .await
            .unwrap();

        let err = calls.decline_call(session.id, &alice).await.unwrap_err();
        assert!(matches!(err, CallError::NotCallee));

        let state = calls.decline_call(session.id, &bob).await.unwrap();
        assert_eq!(state, CallState::Declined);
        // Repeat decline settles on the same answer.
        let state = calls.decline_call(session.id, &bob).await.unwrap();
        assert_eq!(state, CallState::Declined);

        assert!(store.messages(&thread_id).await.unwrap().is_empty());
        assert!(calls.active_session(&thread_id).await.is_none());
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_ended() {
        let (store, calls, thread_id, alice, bob) = setup().await;

        let session = calls
            .start_call(&thread_id, &alice, &bob, CallType::Audio)
            .await
            .unwrap();
        calls.join_call(session.id, &bob).await.unwrap();
        // Duplicate accept taps are harmless.
        calls.join_call(session.id, &bob).await.unwrap();

        calls.mark_connected(session.id).await.unwrap();
        calls.mark_connected(session.id).await.unwrap();
        assert_eq!(
            calls.session(session.id).await.unwrap().state,
            CallState::Connected
        );

        let state = calls.end_call(session.id, &bob).await.unwrap();
        assert_eq!(state, CallState::Ended);
        assert!(store.messages(&thread_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn join_guards_role_and_connected_guards_order() {
        let (_store, calls, thread_id, alice, bob) = setup().await;

        let session = calls
            .start_call(&thread_id, &alice, &bob, CallType::Audio)
            .await
            .unwrap();

        let err = calls.join_call(session.id, &alice).await.unwrap_err();
        assert!(matches!(err, CallError::NotCallee));

        let err = calls.mark_connected(session.id).await.unwrap_err();
        assert!(matches!(err, CallError::InvalidTransition(_)));

        let err = calls
            .join_call(SessionId::new(), &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn calls_require_an_existing_thread() {
        let store = ThreadStore::new();
        let calls = CallCoordinator::new(store);
        let thread_id = ThreadId::for_pair(&"alice".into(), &"bob".into());

        let err = calls
            .start_call(&thread_id, &"alice".into(), &"bob".into(), CallType::Audio)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CallError::Store(StoreError::ThreadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn watch_thread_tracks_the_slot() {
        let (_store, calls, thread_id, alice, bob) = setup().await;

        let watch = calls.watch_thread(&thread_id).await;
        assert!(watch.borrow().is_none());

        let session = calls
            .start_call(&thread_id, &alice, &bob, CallType::Video)
            .await
            .unwrap();
        assert_eq!(
            watch.borrow().as_ref().map(|s| s.id),
            Some(session.id)
        );

        calls.end_call(session.id, &bob).await.unwrap();
        assert!(watch.borrow().is_none());
    }

    #[tokio::test]
    async fn end_rejects_outsiders() {
        let (_store, calls, thread_id, alice, bob) = setup().await;
        let session = calls
            .start_call(&thread_id, &alice, &bob, CallType::Audio)
            .await
            .unwrap();
        let err = calls
            .end_call(session.id, &"mallory".into())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::NotParty));
    }
}
