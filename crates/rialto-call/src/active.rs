//! One side of one live call attempt, held as a scope.
//!
//! An [`ActiveCall`] owns the local media handle, the transport control
//! and the pump tasks moving payloads between transport and relay. Every
//! way a call can end (local hangup, remote hangup or decline observed
//! on the state watch, transport peer loss, caller-side ring timeout,
//! dropping the value) funnels into one teardown that releases media and
//! closes the transport exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rialto_shared::{Role, SessionId, UserId};

use crate::coordinator::CallCoordinator;
use crate::error::{CallError, Result};
use crate::relay::{SignalRelay, SignalStream};
use crate::session::{CallSession, CallState};
use crate::transport::{MediaHandle, TransportControl, TransportEvent, TransportFactory};

struct CallResources {
    media: Mutex<Option<Box<dyn MediaHandle>>>,
    transport: Mutex<Option<Box<dyn TransportControl>>>,
    torn_down: AtomicBool,
}

impl CallResources {
    /// Release everything, exactly once. Safe to race from any task.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.transport.lock() {
            if let Some(mut control) = guard.take() {
                control.close();
            }
        }
        if let Ok(mut guard) = self.media.lock() {
            if let Some(mut media) = guard.take() {
                media.release();
            }
        }
        debug!("Call resources released");
    }
}

/// Scoped handle to one side of a call attempt.
pub struct ActiveCall {
    session: CallSession,
    role: Role,
    local_user: UserId,
    coordinator: CallCoordinator,
    resources: Arc<CallResources>,
    state_rx: watch::Receiver<CallState>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveCall {
    /// Attach to a session with already-acquired media.
    ///
    /// The media handle is acquired *before* the session transition
    /// (start or join) so that a capture failure never creates a call
    /// the peer would see; on any failure here the handle is released
    /// before returning.
    pub async fn start(
        coordinator: &CallCoordinator,
        session: CallSession,
        role: Role,
        media: Box<dyn MediaHandle>,
        transport: &dyn TransportFactory,
        ring_timeout: Option<Duration>,
    ) -> Result<ActiveCall> {
        let local_user = match role {
            Role::Caller => session.caller.clone(),
            Role::Callee => session.callee.clone(),
        };

        let resources = Arc::new(CallResources {
            media: Mutex::new(Some(media)),
            transport: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        });

        let relay = coordinator.relay();
        let state_rx = match coordinator.subscribe(session.id).await {
            Ok(rx) => rx,
            Err(e) => {
                resources.teardown();
                return Err(e);
            }
        };
        let inbound = match relay.subscribe(session.id, role).await {
            Ok(stream) => stream,
            Err(e) => {
                resources.teardown();
                return Err(e);
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let control = transport.connect(role, session.call_type, events_tx);
        if let Ok(mut guard) = resources.transport.lock() {
            *guard = Some(control);
        }

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(pump_inbound(inbound, resources.clone())));
        tasks.push(tokio::spawn(pump_events(
            events_rx,
            coordinator.clone(),
            relay,
            session.id,
            role,
            local_user.clone(),
        )));
        tasks.push(tokio::spawn(watch_state(
            state_rx.clone(),
            resources.clone(),
        )));
        if role == Role::Caller {
            if let Some(timeout) = ring_timeout {
                tasks.push(tokio::spawn(ring_timer(
                    coordinator.clone(),
                    session.id,
                    local_user.clone(),
                    timeout,
                )));
            }
        }

        info!(
            session = %session.id.short(),
            role = %role,
            "Active call attached"
        );

        Ok(ActiveCall {
            session,
            role,
            local_user,
            coordinator: coordinator.clone(),
            resources,
            state_rx,
            tasks,
        })
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Latest observed session state.
    pub fn state(&self) -> CallState {
        *self.state_rx.borrow()
    }

    /// A watch on the session state, for UIs driving their own view.
    pub fn state_watch(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    /// End the call locally and release resources synchronously.
    ///
    /// Hanging up while the call is still offering (as the caller)
    /// classifies it as missed; see [`CallCoordinator::end_call`].
    pub async fn hang_up(&self) -> Result<CallState> {
        let state = self
            .coordinator
            .end_call(self.session.id, &self.local_user)
            .await?;
        self.resources.teardown();
        Ok(state)
    }

    pub fn set_muted(&self, muted: bool) {
        if let Ok(mut guard) = self.resources.media.lock() {
            if let Some(media) = guard.as_mut() {
                media.set_muted(muted);
            }
        }
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        if let Ok(mut guard) = self.resources.media.lock() {
            if let Some(media) = guard.as_mut() {
                media.set_video_enabled(enabled);
            }
        }
    }

    /// Wait until the session reaches a terminal state.
    pub async fn wait_terminal(&mut self) -> CallState {
        loop {
            let state = *self.state_rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if self.state_rx.changed().await.is_err() {
                return *self.state_rx.borrow();
            }
        }
    }
}

impl std::fmt::Debug for ActiveCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveCall")
            .field("session", &self.session.id)
            .field("role", &self.role)
            .field("local_user", &self.local_user)
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.resources.teardown();
        for task in &self.tasks {
            task.abort();
        }
        // A call dropped while still live is ended on behalf of the
        // local user, so the peer is not left ringing a dead scope.
        if !self.state_rx.borrow().is_terminal() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let coordinator = self.coordinator.clone();
                let session_id = self.session.id;
                let user = self.local_user.clone();
                handle.spawn(async move {
                    let _ = coordinator.end_call(session_id, &user).await;
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pump tasks
// ---------------------------------------------------------------------------

async fn pump_inbound(mut inbound: SignalStream, resources: Arc<CallResources>) {
    while let Some(envelope) = inbound.next().await {
        let Ok(mut guard) = resources.transport.lock() else {
            return;
        };
        match guard.as_mut() {
            Some(control) => control.feed_signal(envelope.payload),
            None => return,
        }
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    coordinator: CallCoordinator,
    relay: SignalRelay,
    session_id: SessionId,
    role: Role,
    local_user: UserId,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Signal(payload) => {
                match relay.send(session_id, role, payload).await {
                    Ok(_) => {}
                    // The session ended while the payload was in flight;
                    // it is dropped, not an error.
                    Err(CallError::SessionClosed) => break,
                    Err(e) => {
                        warn!(session = %session_id.short(), error = %e, "Signal send failed");
                    }
                }
            }
            TransportEvent::Connected => {
                if let Err(e) = coordinator.mark_connected(session_id).await {
                    warn!(session = %session_id.short(), error = %e, "Connected mark rejected");
                }
            }
            TransportEvent::PeerLost => {
                info!(session = %session_id.short(), "Transport lost the peer");
                let _ = coordinator.end_call(session_id, &local_user).await;
                break;
            }
            TransportEvent::Failed(reason) => {
                warn!(session = %session_id.short(), reason, "Transport failed");
                let _ = coordinator.end_call(session_id, &local_user).await;
                break;
            }
        }
    }
}

async fn watch_state(mut state_rx: watch::Receiver<CallState>, resources: Arc<CallResources>) {
    loop {
        let state = *state_rx.borrow_and_update();
        if state.is_terminal() {
            resources.teardown();
            return;
        }
        if state_rx.changed().await.is_err() {
            resources.teardown();
            return;
        }
    }
}

async fn ring_timer(
    coordinator: CallCoordinator,
    session_id: SessionId,
    caller: UserId,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;
    if let Ok(session) = coordinator.session(session_id).await {
        if session.state == CallState::Offering {
            info!(session = %session_id.short(), "Ring timeout, giving up");
            let _ = coordinator.end_call(session_id, &caller).await;
        }
    }
}
