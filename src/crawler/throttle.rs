//! Shared request throttle for the index site
//!
//! Every request the walker makes passes through one [`Throttle`], so
//! concurrent post fetches still respect a single spacing window.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a randomized minimum spacing between requests
#[derive(Debug)]
pub struct Throttle {
    min_spacing: Duration,
    max_spacing: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Spacing is drawn uniformly from `min_spacing..=max_spacing`
    pub fn new(min_spacing: Duration, max_spacing: Duration) -> Self {
        Self {
            min_spacing,
            max_spacing: max_spacing.max(min_spacing),
            next_slot: Mutex::new(None),
        }
    }

    /// A throttle that never waits
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Raises the minimum spacing to at least `floor` (robots.txt `Crawl-delay`)
    pub fn with_floor(self, floor: Option<Duration>) -> Self {
        match floor {
            Some(floor) if floor > self.min_spacing => {
                tracing::info!("Crawl-delay raises request spacing to {:?}", floor);
                Self::new(floor, self.max_spacing.max(floor))
            }
            _ => self,
        }
    }

    pub fn spacing(&self) -> (Duration, Duration) {
        (self.min_spacing, self.max_spacing)
    }

    fn draw_spacing(&self) -> Duration {
        if self.max_spacing <= self.min_spacing {
            return self.min_spacing;
        }
        rand::thread_rng().gen_range(self.min_spacing..=self.max_spacing)
    }

    /// Waits until this caller may send its request
    ///
    /// Slots are handed out in call order; the lock is only held while the
    /// slot is reserved, never while sleeping.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.draw_spacing());
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
