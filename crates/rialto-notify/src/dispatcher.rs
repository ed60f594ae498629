//! Unread-delta watcher: turns thread-state changes into local
//! notification events and best-effort external pushes.
//!
//! One dispatcher runs per signed-in user. It observes the store-wide
//! thread feed, remembers the last unread count it saw per thread, and
//! reacts only to strict increases that were not caused by the user's
//! own message while the user is not looking at that thread. Baseline
//! counts are primed from a snapshot at spawn so unread backlog does not
//! replay as notifications on startup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use rialto_shared::{ThreadId, UserId};
use rialto_store::{ThreadEvents, ThreadState, ThreadStore};

use crate::push::PushSink;

/// One in-app notification: a message arrived in a thread the user is
/// not viewing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub thread_id: ThreadId,
    pub sender: UserId,
    pub sender_name: String,
    pub preview: String,
}

/// Handle to a running dispatcher. Dropping it stops the task; the
/// store and other subscribers are unaffected.
pub struct NotificationDispatcher {
    events_rx: mpsc::UnboundedReceiver<NotificationEvent>,
    task: JoinHandle<()>,
}

impl NotificationDispatcher {
    /// Spawn the dispatcher for `user`. `focus` carries the thread the
    /// user is currently viewing (`None` when outside the chat view).
    pub async fn spawn(
        store: ThreadStore,
        user: UserId,
        push: Arc<dyn PushSink>,
        focus: watch::Receiver<Option<ThreadId>>,
    ) -> Self {
        // Subscribe before snapshotting: a mutation landing in between
        // is then seen once with a count equal to the baseline and
        // skipped as flat, instead of being missed entirely.
        let feed = store.watch_events();
        let baseline: HashMap<ThreadId, u64> = store
            .threads_for(&user)
            .await
            .into_iter()
            .map(|t| {
                let count = t.unread_for(&user);
                (t.id, count)
            })
            .collect();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(feed, baseline, user, push, focus, events_tx));
        Self { events_rx, task }
    }

    /// Next notification event; `None` once the store is gone.
    pub async fn next(&mut self) -> Option<NotificationEvent> {
        self.events_rx.recv().await
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut feed: ThreadEvents,
    mut last_seen: HashMap<ThreadId, u64>,
    user: UserId,
    push: Arc<dyn PushSink>,
    focus: watch::Receiver<Option<ThreadId>>,
    events_tx: mpsc::UnboundedSender<NotificationEvent>,
) {
    while let Some(state) = feed.next().await {
        if !state.is_participant(&user) {
            continue;
        }

        let count = state.unread_for(&user);
        let prev = last_seen.insert(state.id.clone(), count).unwrap_or(0);
        if count <= prev {
            continue;
        }

        // An increase caused by the user's own send never happens (own
        // messages increment the peer's counter), but the attribution
        // gate also covers stores that merge writes differently.
        let Some(sender) = state.last_message_sender.clone() else {
            continue;
        };
        if sender == user {
            continue;
        }

        if focus.borrow().as_ref() == Some(&state.id) {
            debug!(thread = %state.id, "Suppressing notification for focused thread");
            continue;
        }

        let event = build_event(&state, &sender);
        let title = format!("New message from {}", event.sender_name);
        let body = event.preview.clone();

        // Local consumer may be gone (UI closed); external push still goes.
        let _ = events_tx.send(event);

        if let Err(e) = push.push(&user, &title, &body) {
            warn!(user = %user.short(), error = %e, "Push delivery failed");
        }
    }
}

fn build_event(state: &ThreadState, sender: &UserId) -> NotificationEvent {
    let sender_name = state
        .info_for(sender)
        .map(|i| i.display_name.clone())
        .unwrap_or_else(|| sender.to_string());
    let preview = state
        .last_message
        .clone()
        .unwrap_or_else(|| "Sent you a message".to_string());
    NotificationEvent {
        thread_id: state.id.clone(),
        sender: sender.clone(),
        sender_name,
        preview,
    }
}
