//! Send pacing

use std::time::Duration;
use tokio::time::Instant;

/// Fires this close to their deadline still count as on schedule
const ON_TIME_TOLERANCE: Duration = Duration::from_millis(50);

/// Monotonic deadline schedule for one campaign.
///
/// With `r` messages per hour sends are `3600s / r` apart, anchored at the
/// first send. A late send re-anchors the schedule at its fire time, so the
/// worker never bursts to make up for a slow gateway.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Option<Duration>,
    next: Option<Instant>,
}

impl Pacer {
    pub fn new(messages_per_hour: i32) -> Self {
        Self {
            interval: Self::interval_for(messages_per_hour),
            next: None,
        }
    }

    /// Gap between sends, `None` when unpaced
    pub fn interval_for(messages_per_hour: i32) -> Option<Duration> {
        u32::try_from(messages_per_hour)
            .ok()
            .filter(|r| *r > 0)
            .map(|r| Duration::from_secs(3600) / r)
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// When the next send becomes eligible; `None` means immediately
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next
    }

    /// Advance the schedule after a send fired at `fired_at`
    pub fn record_fire(&mut self, fired_at: Instant) {
        let Some(interval) = self.interval else {
            return;
        };

        self.next = Some(match self.next {
            Some(deadline) if fired_at <= deadline + ON_TIME_TOLERANCE => deadline + interval,
            _ => fired_at + interval,
        });
    }

    /// Time needed for `remaining` more sends, `None` when unpaced
    pub fn estimate(&self, remaining: u32) -> Option<Duration> {
        self.interval.map(|interval| interval * remaining)
    }
}
