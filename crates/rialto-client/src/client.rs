//! Per-user façade over the communication core.
//!
//! [`CommsCore`] wires the store, presence tracker and call coordinator
//! together; one [`ClientSession`] is created per signed-in user and
//! carries their perspective: lazy thread creation on first send, focus
//! tracking for notification suppression, the presence heartbeat, and
//! the call surface (place, accept, decline, hang up).

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use rialto_call::{
    ActiveCall, CallCoordinator, CallSession, CallState, MediaHandle, MediaSource,
    TransportFactory,
};
use rialto_notify::{LogPush, NotificationDispatcher, PushSink};
use rialto_shared::{CallType, Role, ThreadId, UserId};
use rialto_store::{
    spawn_heartbeat, HeartbeatTask, Message, MessageFeed, ParticipantInfo, PresenceTracker,
    ThreadState, ThreadStore, ThreadWatch,
};

use crate::config::CoreConfig;

/// The shared communication core: one per store connection, used by
/// every client session of this process.
pub struct CommsCore {
    config: CoreConfig,
    threads: ThreadStore,
    presence: PresenceTracker,
    calls: CallCoordinator,
}

impl CommsCore {
    pub fn new(config: CoreConfig) -> Arc<Self> {
        let threads = ThreadStore::new();
        let presence = PresenceTracker::new(config.presence_window);
        let calls = CallCoordinator::new(threads.clone());
        Arc::new(Self {
            config,
            threads,
            presence,
            calls,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn calls(&self) -> &CallCoordinator {
        &self.calls
    }
}

/// One signed-in user's handle on the core.
///
/// Dropping the session stops its heartbeat; threads, calls and other
/// sessions are unaffected.
pub struct ClientSession {
    core: Arc<CommsCore>,
    me: ParticipantInfo,
    media: Arc<dyn MediaSource>,
    transport: Arc<dyn TransportFactory>,
    focus_tx: watch::Sender<Option<ThreadId>>,
    _heartbeat: HeartbeatTask,
}

impl ClientSession {
    /// Register the user's profile, start their heartbeat and hand back
    /// their session.
    pub async fn sign_in(
        core: Arc<CommsCore>,
        me: ParticipantInfo,
        media: Arc<dyn MediaSource>,
        transport: Arc<dyn TransportFactory>,
    ) -> Self {
        core.presence
            .upsert_profile(&me.user_id, me.display_name.clone(), me.avatar_ref.clone())
            .await;
        let heartbeat = spawn_heartbeat(
            core.presence.clone(),
            me.user_id.clone(),
            core.config.heartbeat_interval,
        );
        let (focus_tx, _) = watch::channel(None);

        info!(user = %me.user_id.short(), "Client session signed in");
        Self {
            core,
            me,
            media,
            transport,
            focus_tx,
            _heartbeat: heartbeat,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.me.user_id
    }

    /// The conversation id this user shares with `other`, computable
    /// before the thread exists.
    pub fn thread_with(&self, other: &UserId) -> ThreadId {
        ThreadId::for_pair(&self.me.user_id, other)
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Send a message, creating the thread on first contact. The
    /// pending-thread object the UI holds before this call is purely
    /// client-side; nothing is persisted until the first send.
    pub async fn send_message(
        &self,
        to: &ParticipantInfo,
        text: &str,
    ) -> rialto_store::Result<Message> {
        self.send_inner(to, text, None).await
    }

    /// Send a first message from a listing page, recording which listing
    /// the conversation is about.
    pub async fn send_message_for_listing(
        &self,
        to: &ParticipantInfo,
        listing_ref: &str,
        text: &str,
    ) -> rialto_store::Result<Message> {
        self.send_inner(to, text, Some(listing_ref.to_string())).await
    }

    async fn send_inner(
        &self,
        to: &ParticipantInfo,
        text: &str,
        listing_ref: Option<String>,
    ) -> rialto_store::Result<Message> {
        let thread_id = self.thread_with(&to.user_id);
        self.core
            .threads
            .ensure_thread(&thread_id, self.me.clone(), to.clone(), listing_ref)
            .await?;
        self.core
            .threads
            .append_message(&thread_id, &self.me.user_id, text)
            .await
    }

    /// Enter a thread: zero this user's unread counter and mark the
    /// thread as focused so its notifications are suppressed.
    pub async fn open_thread(&self, thread_id: &ThreadId) -> rialto_store::Result<()> {
        self.core
            .threads
            .open_thread(thread_id, &self.me.user_id)
            .await?;
        self.focus_tx.send_replace(Some(thread_id.clone()));
        Ok(())
    }

    /// Leave the chat view; notifications resume for every thread.
    pub fn leave_thread(&self) {
        self.focus_tx.send_replace(None);
    }

    pub async fn threads(&self) -> Vec<ThreadState> {
        self.core.threads.threads_for(&self.me.user_id).await
    }

    pub async fn total_unread(&self) -> u64 {
        self.core.threads.total_unread(&self.me.user_id).await
    }

    pub async fn subscribe_thread(&self, thread_id: &ThreadId) -> rialto_store::Result<ThreadWatch> {
        self.core.threads.subscribe(thread_id).await
    }

    pub async fn subscribe_messages(
        &self,
        thread_id: &ThreadId,
    ) -> rialto_store::Result<MessageFeed> {
        self.core.threads.subscribe_messages(thread_id).await
    }

    /// Whether a peer's last heartbeat is inside the presence window.
    pub async fn peer_online(&self, user: &UserId) -> bool {
        self.core.presence.online(user).await
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Place a call to `callee` on the shared thread.
    ///
    /// Media is acquired before the session is created, so a capture
    /// failure never leaves the peer with a ringing ghost; `AlreadyInCall`
    /// if the thread's slot is occupied.
    pub async fn start_call(
        &self,
        callee: &UserId,
        call_type: CallType,
    ) -> rialto_call::Result<ActiveCall> {
        let thread_id = self.thread_with(callee);
        let mut media = self.media.acquire(call_type)?;

        let session = match self
            .core
            .calls
            .start_call(&thread_id, &self.me.user_id, callee, call_type)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                media.release();
                return Err(e);
            }
        };

        ActiveCall::start(
            &self.core.calls,
            session,
            Role::Caller,
            media,
            self.transport.as_ref(),
            Some(self.core.config.ring_timeout),
        )
        .await
    }

    /// Observe a thread's active-call slot (incoming-call surface).
    pub async fn incoming_calls(
        &self,
        thread_id: &ThreadId,
    ) -> watch::Receiver<Option<CallSession>> {
        self.core.calls.watch_thread(thread_id).await
    }

    /// Accept an offering call. A stale session reference (the caller
    /// already gave up or redialed) fails with `StaleSession` and must
    /// be discarded.
    pub async fn accept_call(&self, session: &CallSession) -> rialto_call::Result<ActiveCall> {
        let mut media = self.media.acquire(session.call_type)?;

        if let Err(e) = self
            .core
            .calls
            .join_call(session.id, &self.me.user_id)
            .await
        {
            media.release();
            return Err(e);
        }

        ActiveCall::start(
            &self.core.calls,
            session.clone(),
            Role::Callee,
            media,
            self.transport.as_ref(),
            None,
        )
        .await
    }

    /// Refuse an offering call without acquiring anything.
    pub async fn decline_call(&self, session: &CallSession) -> rialto_call::Result<CallState> {
        self.core
            .calls
            .decline_call(session.id, &self.me.user_id)
            .await
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Spawn this user's notification dispatcher. When external pushes
    /// are disabled in config, the sink is replaced by the log-only one.
    pub async fn notifications(&self, push: Arc<dyn PushSink>) -> NotificationDispatcher {
        let sink: Arc<dyn PushSink> = if self.core.config.push_enabled {
            push
        } else {
            Arc::new(LogPush)
        };
        NotificationDispatcher::spawn(
            self.core.threads.clone(),
            self.me.user_id.clone(),
            sink,
            self.focus_tx.subscribe(),
        )
        .await
    }
}
