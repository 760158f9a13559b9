use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Fixed-window limiter gating provider API calls.
#[derive(Debug)]
pub struct RateLimit {
    // The number of calls that can be made per window.
    capacity: u64,
    // Milliseconds of fixed window period.
    period: u64,

    origin: Instant,
    // Used calls in the current window.
    used: AtomicU64,
    // End of the current window, in milliseconds since `origin`.
    reset: AtomicU64,
}

impl RateLimit {
    pub fn new(num: u64, per: Duration) -> Self {
        let period = u64::try_from(per.as_millis()).unwrap_or(u64::MAX).max(1);

        Self {
            capacity: num.max(1),
            period,
            origin: Instant::now(),
            used: AtomicU64::new(0),
            reset: AtomicU64::new(period),
        }
    }

    /// `num` calls per second.
    pub fn per_second(num: u64) -> Self {
        Self::new(num, Duration::from_secs(1))
    }

    fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn try_ready(&self) -> bool {
        let now = self.elapsed_millis();
        let reset = self.reset.load(Ordering::Acquire);

        if now >= reset {
            // The window has elapsed; start a new one aligned to the period.
            let windows = (now - reset) / self.period + 1;
            self.reset.store(reset + windows * self.period, Ordering::Release);
            self.used.store(1, Ordering::Release);
            return true;
        }

        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.capacity).then_some(used + 1)
            })
            .is_ok()
    }

    pub async fn ready(&self) {
        while !self.try_ready() {
            // Out of calls; sleep until the window resets.
            let reset = self.reset.load(Ordering::Acquire);
            sleep_until(self.origin + Duration::from_millis(reset)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn allows_capacity_per_window() {
        let limit = RateLimit::new(2, Duration::from_secs(1));

        assert!(limit.try_ready());
        assert!(limit.try_ready());
        assert!(!limit.try_ready());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limit.try_ready());
        assert!(limit.try_ready());
        assert!(!limit.try_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_waits_for_next_window() {
        let limit = RateLimit::per_second(1);
        let start = Instant::now();

        limit.ready().await;
        limit.ready().await;

        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_windows_are_skipped() {
        let limit = RateLimit::new(1, Duration::from_secs(1));
        assert!(limit.try_ready());

        tokio::time::advance(Duration::from_millis(5500)).await;
        assert!(limit.try_ready());
        assert!(!limit.try_ready());

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limit.try_ready());
    }
}
