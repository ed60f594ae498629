//! Thread store adapter: deterministic conversation identity, append-only
//! message logs and atomic unread counters.
//!
//! This stands in for the durable document store the surrounding
//! application runs against. The three primitives that store is assumed
//! to provide (commutative atomic increment, conditional write, change
//! subscription) are realized here with a single `tokio::Mutex` per
//! store plus `watch`/`broadcast`/`mpsc` channels, so every mutation is
//! one atomic unit: either the log entry, the counter increment and the
//! preview update all land, or none of them do.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::debug;
use uuid::Uuid;

use rialto_shared::constants::MAX_MESSAGE_CHARS;
use rialto_shared::{ThreadId, UserId};

use crate::error::{Result, StoreError};
use crate::models::{Message, ParticipantInfo, ThreadState};

/// Capacity of the store-wide event feed. Slow consumers may lag and
/// skip intermediate states; they always see the newest state next.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct ThreadEntry {
    state: ThreadState,
    log: Vec<Message>,
    next_seq: u64,
    state_tx: watch::Sender<ThreadState>,
    feed_txs: Vec<mpsc::UnboundedSender<Message>>,
}

/// Shared handle to the conversation store. Cheap to clone.
#[derive(Clone)]
pub struct ThreadStore {
    inner: Arc<Mutex<HashMap<ThreadId, ThreadEntry>>>,
    events_tx: broadcast::Sender<ThreadState>,
}

impl ThreadStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
        }
    }

    /// Create the thread if absent; a strict no-op if it already exists.
    ///
    /// Safe under concurrent callers from both participants: the second
    /// writer's call merges into nothing, leaving counters, history and
    /// the first writer's metadata snapshots untouched.
    pub async fn ensure_thread(
        &self,
        thread_id: &ThreadId,
        a: ParticipantInfo,
        b: ParticipantInfo,
        listing_ref: Option<String>,
    ) -> Result<ThreadState> {
        let mut threads = self.inner.lock().await;

        if let Some(entry) = threads.get(thread_id) {
            let existing: Vec<&UserId> = entry.state.participants.iter().collect();
            if !existing.contains(&&a.user_id) || !existing.contains(&&b.user_id) {
                return Err(StoreError::MutationFailed(format!(
                    "thread {thread_id} exists with different participants"
                )));
            }
            return Ok(entry.state.clone());
        }

        // Align snapshots with the sorted participant order the id is
        // derived from.
        let (lo, hi) = if a.user_id <= b.user_id { (a, b) } else { (b, a) };
        let mut unread = HashMap::new();
        unread.insert(lo.user_id.clone(), 0);
        unread.insert(hi.user_id.clone(), 0);

        let state = ThreadState {
            id: thread_id.clone(),
            participants: [lo.user_id.clone(), hi.user_id.clone()],
            participant_info: [lo, hi],
            unread,
            last_message: None,
            last_message_sender: None,
            last_message_at: None,
            listing_ref,
            created_at: Utc::now(),
        };

        debug!(thread = %thread_id, "Thread created");

        let (state_tx, _) = watch::channel(state.clone());
        threads.insert(
            thread_id.clone(),
            ThreadEntry {
                state: state.clone(),
                log: Vec::new(),
                next_seq: 0,
                state_tx,
                feed_txs: Vec::new(),
            },
        );

        let _ = self.events_tx.send(state.clone());
        Ok(state)
    }

    /// Append a user message: one atomic unit covering the log entry,
    /// the recipient's unread increment and the preview fields.
    pub async fn append_message(
        &self,
        thread_id: &ThreadId,
        sender: &UserId,
        text: &str,
    ) -> Result<Message> {
        self.append(thread_id, sender, text, false).await
    }

    /// Append a system-generated notice (e.g. a missed-call entry).
    /// Counts against the recipient's unread like any other message.
    pub async fn append_system_message(
        &self,
        thread_id: &ThreadId,
        sender: &UserId,
        text: &str,
    ) -> Result<Message> {
        self.append(thread_id, sender, text, true).await
    }

    async fn append(
        &self,
        thread_id: &ThreadId,
        sender: &UserId,
        text: &str,
        is_system: bool,
    ) -> Result<Message> {
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(StoreError::MessageTooLong(MAX_MESSAGE_CHARS));
        }

        let mut threads = self.inner.lock().await;
        let entry = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.clone()))?;

        let recipient = entry
            .state
            .other_participant(sender)
            .ok_or_else(|| StoreError::NotParticipant {
                user: sender.clone(),
                thread: thread_id.clone(),
            })?
            .clone();

        let message = Message {
            id: Uuid::new_v4(),
            thread_id: thread_id.clone(),
            sender: sender.clone(),
            text: text.to_string(),
            seq: entry.next_seq,
            sent_at: Utc::now(),
            is_system,
        };
        entry.next_seq += 1;
        entry.log.push(message.clone());

        *entry.state.unread.entry(recipient).or_insert(0) += 1;
        entry.state.last_message = Some(message.text.clone());
        entry.state.last_message_sender = Some(sender.clone());
        entry.state.last_message_at = Some(message.sent_at);

        debug!(
            thread = %thread_id,
            sender = %sender.short(),
            seq = message.seq,
            system = is_system,
            "Message appended"
        );

        self.publish(entry);
        entry.feed_txs.retain(|tx| tx.send(message.clone()).is_ok());

        Ok(message)
    }

    /// Zero the reader's unread counter. Idempotent.
    pub async fn open_thread(&self, thread_id: &ThreadId, reader: &UserId) -> Result<()> {
        let mut threads = self.inner.lock().await;
        let entry = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.clone()))?;

        if !entry.state.is_participant(reader) {
            return Err(StoreError::NotParticipant {
                user: reader.clone(),
                thread: thread_id.clone(),
            });
        }

        let counter = entry.state.unread.entry(reader.clone()).or_insert(0);
        if *counter != 0 {
            *counter = 0;
            self.publish(entry);
        }
        Ok(())
    }

    /// Current state of one thread.
    pub async fn thread(&self, thread_id: &ThreadId) -> Result<ThreadState> {
        let threads = self.inner.lock().await;
        threads
            .get(thread_id)
            .map(|e| e.state.clone())
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.clone()))
    }

    /// Full message log of one thread, in send order.
    pub async fn messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        let threads = self.inner.lock().await;
        threads
            .get(thread_id)
            .map(|e| e.log.clone())
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.clone()))
    }

    /// All threads the user participates in, most recent activity first.
    pub async fn threads_for(&self, user: &UserId) -> Vec<ThreadState> {
        let threads = self.inner.lock().await;
        let mut out: Vec<ThreadState> = threads
            .values()
            .filter(|e| e.state.is_participant(user))
            .map(|e| e.state.clone())
            .collect();
        out.sort_by_key(|s| std::cmp::Reverse(s.last_activity()));
        out
    }

    /// Sum of the user's unread counters across all threads (badge count).
    pub async fn total_unread(&self, user: &UserId) -> u64 {
        let threads = self.inner.lock().await;
        threads
            .values()
            .filter(|e| e.state.is_participant(user))
            .map(|e| e.state.unread_for(user))
            .sum()
    }

    /// Subscribe to one thread's state. The current state is delivered
    /// immediately, then the latest state after every mutation.
    /// Intermediate states may coalesce under backpressure.
    pub async fn subscribe(&self, thread_id: &ThreadId) -> Result<ThreadWatch> {
        let threads = self.inner.lock().await;
        let entry = threads
            .get(thread_id)
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.clone()))?;
        Ok(ThreadWatch {
            rx: entry.state_tx.subscribe(),
            primed: false,
        })
    }

    /// Subscribe to a thread's message log: the existing backlog is
    /// replayed in order, then live appends follow gap-free.
    pub async fn subscribe_messages(&self, thread_id: &ThreadId) -> Result<MessageFeed> {
        let mut threads = self.inner.lock().await;
        let entry = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.clone()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        for message in &entry.log {
            // Receiver is still in scope, send cannot fail here.
            let _ = tx.send(message.clone());
        }
        entry.feed_txs.push(tx);
        Ok(MessageFeed { rx })
    }

    /// Store-wide feed of post-mutation thread states, for observers that
    /// span threads (notification dispatch, badge counts).
    pub fn watch_events(&self) -> ThreadEvents {
        ThreadEvents {
            rx: self.events_tx.subscribe(),
        }
    }

    fn publish(&self, entry: &ThreadEntry) {
        let _ = entry.state_tx.send_replace(entry.state.clone());
        let _ = self.events_tx.send(entry.state.clone());
    }
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Subscription handles
// ---------------------------------------------------------------------------

/// Long-lived subscription to one thread's state. Dropping it releases
/// the subscription without affecting the thread or other subscribers.
pub struct ThreadWatch {
    rx: watch::Receiver<ThreadState>,
    primed: bool,
}

impl ThreadWatch {
    /// The most recently published state.
    pub fn current(&self) -> ThreadState {
        self.rx.borrow().clone()
    }

    /// Next state: the current one on first call, then each change.
    /// Returns `None` once the thread store is gone.
    pub async fn next(&mut self) -> Option<ThreadState> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Ordered message subscription: backlog first, then live appends.
pub struct MessageFeed {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl MessageFeed {
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Store-wide thread-state feed. Lagging consumers skip intermediate
/// states rather than stalling writers.
pub struct ThreadEvents {
    rx: broadcast::Receiver<ThreadState>,
}

impl ThreadEvents {
    pub async fn next(&mut self) -> Option<ThreadState> {
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Thread event feed lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rialto_shared::ThreadId;

    fn participants() -> (ParticipantInfo, ParticipantInfo, ThreadId) {
        let a = ParticipantInfo::new("alice", "Alice");
        let b = ParticipantInfo::new("bob", "Bob");
        let id = ThreadId::for_pair(&a.user_id, &b.user_id);
        (a, b, id)
    }

    #[tokio::test]
    async fn ensure_thread_is_idempotent() {
        let store = ThreadStore::new();
        let (a, b, id) = participants();

        store
            .ensure_thread(&id, a.clone(), b.clone(), None)
            .await
            .unwrap();
        store
            .append_message(&id, &a.user_id, "hello")
            .await
            .unwrap();

        // Second creation attempt (e.g. the other participant) changes
        // nothing: history and counters survive, first snapshot wins.
        let other_view = ParticipantInfo::new("alice", "Alice Renamed");
        let state = store
            .ensure_thread(&id, other_view, b.clone(), None)
            .await
            .unwrap();

        assert_eq!(state.unread_for(&b.user_id), 1);
        assert_eq!(state.info_for(&a.user_id).unwrap().display_name, "Alice");
        assert_eq!(store.messages(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_thread_rejects_participant_mismatch() {
        let store = ThreadStore::new();
        let (a, b, id) = participants();
        store.ensure_thread(&id, a.clone(), b, None).await.unwrap();

        let mallory = ParticipantInfo::new("mallory", "Mallory");
        let err = store.ensure_thread(&id, a, mallory, None).await.unwrap_err();
        assert!(matches!(err, StoreError::MutationFailed(_)));
    }

    #[tokio::test]
    async fn append_updates_counters_and_preview() {
        let store = ThreadStore::new();
        let (a, b, id) = participants();
        store
            .ensure_thread(&id, a.clone(), b.clone(), None)
            .await
            .unwrap();

        store.append_message(&id, &a.user_id, "one").await.unwrap();
        store.append_message(&id, &a.user_id, "two").await.unwrap();
        store.append_message(&id, &b.user_id, "three").await.unwrap();

        let state = store.thread(&id).await.unwrap();
        assert_eq!(state.unread_for(&b.user_id), 2);
        assert_eq!(state.unread_for(&a.user_id), 1);
        assert_eq!(state.last_message.as_deref(), Some("three"));
        assert_eq!(state.last_message_sender.as_ref(), Some(&b.user_id));

        let log = store.messages(&id).await.unwrap();
        let seqs: Vec<u64> = log.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn open_thread_resets_only_reader() {
        let store = ThreadStore::new();
        let (a, b, id) = participants();
        store
            .ensure_thread(&id, a.clone(), b.clone(), None)
            .await
            .unwrap();
        store.append_message(&id, &a.user_id, "hi").await.unwrap();
        store.append_message(&id, &b.user_id, "yo").await.unwrap();

        store.open_thread(&id, &b.user_id).await.unwrap();
        // Repeat is a no-op, not an error.
        store.open_thread(&id, &b.user_id).await.unwrap();

        let state = store.thread(&id).await.unwrap();
        assert_eq!(state.unread_for(&b.user_id), 0);
        assert_eq!(state.unread_for(&a.user_id), 1);
    }

    #[tokio::test]
    async fn concurrent_first_messages_lose_no_update() {
        let store = ThreadStore::new();
        let (a, b, id) = participants();

        // Both participants race thread creation and their first message.
        let (ra, rb) = tokio::join!(
            async {
                store
                    .ensure_thread(&id, a.clone(), b.clone(), None)
                    .await?;
                store.append_message(&id, &a.user_id, "from a").await
            },
            async {
                store
                    .ensure_thread(&id, a.clone(), b.clone(), None)
                    .await?;
                store.append_message(&id, &b.user_id, "from b").await
            },
        );
        ra.unwrap();
        rb.unwrap();

        let state = store.thread(&id).await.unwrap();
        assert_eq!(state.unread_for(&a.user_id), 1);
        assert_eq!(state.unread_for(&b.user_id), 1);
        assert_eq!(store.messages(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn append_to_unknown_thread_fails_clean() {
        let store = ThreadStore::new();
        let id = ThreadId::for_pair(&"a".into(), &"b".into());
        let err = store
            .append_message(&id, &"a".into(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ThreadNotFound(_)));
    }

    #[tokio::test]
    async fn non_participant_cannot_append() {
        let store = ThreadStore::new();
        let (a, b, id) = participants();
        store.ensure_thread(&id, a, b, None).await.unwrap();

        let err = store
            .append_message(&id, &"mallory".into(), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotParticipant { .. }));
    }

    #[tokio::test]
    async fn subscribe_sees_current_then_changes() {
        let store = ThreadStore::new();
        let (a, b, id) = participants();
        store
            .ensure_thread(&id, a.clone(), b.clone(), None)
            .await
            .unwrap();

        let mut watch = store.subscribe(&id).await.unwrap();
        let initial = watch.next().await.unwrap();
        assert_eq!(initial.unread_for(&b.user_id), 0);

        store.append_message(&id, &a.user_id, "ping").await.unwrap();
        let updated = watch.next().await.unwrap();
        assert_eq!(updated.unread_for(&b.user_id), 1);
    }

    #[tokio::test]
    async fn message_feed_replays_backlog_then_live() {
        let store = ThreadStore::new();
        let (a, b, id) = participants();
        store
            .ensure_thread(&id, a.clone(), b.clone(), None)
            .await
            .unwrap();
        store.append_message(&id, &a.user_id, "old").await.unwrap();

        let mut feed = store.subscribe_messages(&id).await.unwrap();
        store.append_message(&id, &b.user_id, "new").await.unwrap();

        assert_eq!(feed.next().await.unwrap().text, "old");
        assert_eq!(feed.next().await.unwrap().text, "new");
    }

    #[tokio::test]
    async fn threads_for_sorts_by_activity() {
        let store = ThreadStore::new();
        let a = ParticipantInfo::new("alice", "Alice");
        let b = ParticipantInfo::new("bob", "Bob");
        let c = ParticipantInfo::new("carol", "Carol");

        let ab = ThreadId::for_pair(&a.user_id, &b.user_id);
        let ac = ThreadId::for_pair(&a.user_id, &c.user_id);
        store
            .ensure_thread(&ab, a.clone(), b.clone(), None)
            .await
            .unwrap();
        store
            .ensure_thread(&ac, a.clone(), c.clone(), None)
            .await
            .unwrap();

        store.append_message(&ab, &b.user_id, "hi").await.unwrap();
        store.append_message(&ac, &c.user_id, "later").await.unwrap();

        let list = store.threads_for(&a.user_id).await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, ac);
        assert_eq!(store.total_unread(&a.user_id).await, 2);
    }
}
