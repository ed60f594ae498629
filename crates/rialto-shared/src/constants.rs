/// Application name
pub const APP_NAME: &str = "Rialto";

/// Staleness threshold beyond which a user counts as offline (5 minutes)
pub const PRESENCE_WINDOW_SECS: u64 = 300;

/// Interval between presence heartbeats (2 minutes)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 120;

/// How long an outgoing call may ring before the caller gives up
pub const RING_TIMEOUT_SECS: u64 = 45;

/// Maximum chat message length in characters
pub const MAX_MESSAGE_CHARS: usize = 4_096;

/// Maximum size of one opaque signaling payload in bytes (64 KiB)
pub const MAX_SIGNAL_PAYLOAD: usize = 65_536;
