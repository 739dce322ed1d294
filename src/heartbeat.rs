use std::time::Duration;
use tokio::time::Instant;

/// Fixed-period trigger measured from boot.
///
/// The next deadline counts from when a tick actually fired, so a cycle that
/// was held up by a blocking operation yields one late tick rather than a
/// burst of catch-up ticks.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    interval: Duration,
    last: Instant,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration, booted_at: Instant) -> Self {
        Self {
            interval,
            last: booted_at,
        }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}
