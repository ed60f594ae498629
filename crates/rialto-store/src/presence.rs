//! Presence tracking: last-activity heartbeats and the derived online
//! flag.
//!
//! Presence is best-effort. A missed heartbeat silently makes the user
//! look stale; nothing here may fail its caller or cascade into the
//! messaging or call paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use rialto_shared::constants::{HEARTBEAT_INTERVAL_SECS, PRESENCE_WINDOW_SECS};
use rialto_shared::UserId;

use crate::models::Profile;

/// Online ⇔ the last heartbeat landed within `window` of `now`.
///
/// Pure; never consults the network or the clock itself.
pub fn is_online(last_active_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (now - last_active_at).to_std() {
        Ok(elapsed) => elapsed < window,
        // A heartbeat "from the future" (clock skew between writers) is
        // fresh by definition.
        Err(_) => true,
    }
}

/// Tracks every known user's profile and last-activity timestamp.
#[derive(Clone)]
pub struct PresenceTracker {
    profiles: Arc<Mutex<HashMap<UserId, Profile>>>,
    window: Duration,
}

impl PresenceTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            profiles: Arc::new(Mutex::new(HashMap::new())),
            window,
        }
    }

    pub fn with_default_window() -> Self {
        Self::new(Duration::from_secs(PRESENCE_WINDOW_SECS))
    }

    /// Record activity for `user` now. Idempotent, side-effect only, and
    /// infallible from the caller's point of view: a user with no profile
    /// yet gets a minimal one, and nothing is ever surfaced as an error.
    pub async fn heartbeat(&self, user: &UserId) {
        let mut profiles = self.profiles.lock().await;
        let now = Utc::now();
        profiles
            .entry(user.clone())
            .and_modify(|p| p.last_active_at = now)
            .or_insert_with(|| Profile {
                user_id: user.clone(),
                display_name: user.to_string(),
                avatar_ref: None,
                last_active_at: now,
            });
        debug!(user = %user.short(), "Heartbeat recorded");
    }

    /// Refresh display metadata (login-time profile write) and beat.
    pub async fn upsert_profile(
        &self,
        user: &UserId,
        display_name: impl Into<String>,
        avatar_ref: Option<String>,
    ) {
        let mut profiles = self.profiles.lock().await;
        let now = Utc::now();
        let profile = Profile {
            user_id: user.clone(),
            display_name: display_name.into(),
            avatar_ref,
            last_active_at: now,
        };
        profiles.insert(user.clone(), profile);
    }

    pub async fn profile(&self, user: &UserId) -> Option<Profile> {
        self.profiles.lock().await.get(user).cloned()
    }

    /// Whether the user's last heartbeat is within the presence window.
    /// Unknown users are offline.
    pub async fn online(&self, user: &UserId) -> bool {
        let profiles = self.profiles.lock().await;
        profiles
            .get(user)
            .map(|p| is_online(p.last_active_at, Utc::now(), self.window))
            .unwrap_or(false)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

// ---------------------------------------------------------------------------
// Heartbeat task
// ---------------------------------------------------------------------------

/// Handle to a running heartbeat loop. Aborts the loop on drop.
pub struct HeartbeatTask {
    handle: JoinHandle<()>,
}

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a periodic heartbeat for `user`: one beat immediately, then one
/// per interval until the returned handle is dropped.
pub fn spawn_heartbeat(
    tracker: PresenceTracker,
    user: UserId,
    interval: Duration,
) -> HeartbeatTask {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            tracker.heartbeat(&user).await;
        }
    });
    HeartbeatTask { handle }
}

/// Spawn with the default 2-minute cadence.
pub fn spawn_default_heartbeat(tracker: PresenceTracker, user: UserId) -> HeartbeatTask {
    spawn_heartbeat(tracker, user, Duration::from_secs(HEARTBEAT_INTERVAL_SECS))
}
