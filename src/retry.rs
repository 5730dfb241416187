use std::time::Duration;

/// Exponential backoff schedule shared by the queue (between handler
/// attempts) and the poller (per-device failure cadence). Parameters are per
/// call site so policy stays in one place without forcing one shape.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Backoff { base, cap }
    }

    /// Delay before the given retry attempt. Attempt 1 is the first retry,
    /// so the schedule runs base, 2×base, 4×base … capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let factor = 1u64 << shift;
        let delay = self.base.saturating_mul(factor as u32);
        delay.min(self.cap)
    }
}

/// Queue schedule: 1 s, 2 s, 4 s … capped at 30 s.
pub const QUEUE_BACKOFF: Backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));

/// Unhealthy-device schedule: doubles from the poll interval, capped at 5 min.
pub const POLL_BACKOFF_CAP: Duration = Duration::from_secs(300);
