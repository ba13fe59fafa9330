//! Token bucket shared by every CRM request

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Capacity-1 token bucket: hands out one admission slot per interval.
///
/// Callers reserve the next free slot under a short lock and then sleep until
/// it arrives, so waiting callers queue up instead of being rejected.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Limiter admitting `rps` requests per second (at least one)
    pub fn per_second(rps: u32) -> Self {
        Self::new(Duration::from_secs(1) / rps.max(1))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn reserve(&self) -> Instant {
        let now = Instant::now();
        let mut next = match self.next_slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.interval);
        slot
    }

    /// Wait for admission. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let slot = self.reserve();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = sleep_until(slot) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_admits_eight_per_second() {
        let limiter = RateLimiter::per_second(8);
        assert_eq!(limiter.interval(), Duration::from_millis(125));

        let token = CancellationToken::new();
        let start = Instant::now();
        let mut admitted_at = Vec::new();
        for _ in 0..9 {
            assert!(limiter.acquire(&token).await);
            admitted_at.push(start.elapsed());
        }

        assert_eq!(admitted_at[0], Duration::ZERO);
        assert_eq!(admitted_at[1], Duration::from_millis(125));
        assert_eq!(admitted_at[8], Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_does_not_accumulate_burst() {
        let limiter = RateLimiter::per_second(8);
        let token = CancellationToken::new();

        assert!(limiter.acquire(&token).await);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let start = Instant::now();
        assert!(limiter.acquire(&token).await);
        assert!(limiter.acquire(&token).await);
        assert_eq!(start.elapsed(), Duration::from_millis(125));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let limiter = RateLimiter::per_second(1);
        let token = CancellationToken::new();
        assert!(limiter.acquire(&token).await);

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        assert!(!limiter.acquire(&token).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
