//! Heartbeat and eviction timing.
//!
//! Kept free of sockets so the cadence can be checked with plain instants.

use std::time::{Duration, Instant};

/// Whether a channel last heard from at `last_heartbeat` should be evicted
pub fn expired(last_heartbeat: Instant, now: Instant, timeout: Duration) -> bool {
    now.saturating_duration_since(last_heartbeat) > timeout
}

/// Whether a periodic action last run at `last` is due again
pub fn due(last: Instant, now: Instant, interval: Duration) -> bool {
    now.saturating_duration_since(last) >= interval
}
