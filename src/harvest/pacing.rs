//! Jittered delays between remote operations.
//!
//! Every class of operation sleeps for a random duration drawn from its
//! configured range, so the request cadence never settles into a machine
//! rhythm the portal could key on.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// An inclusive millisecond range to draw delays from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Draw a duration from the range.
    pub fn sample(&self) -> Duration {
        let upper = self.max_ms.max(self.min_ms);
        let ms = if upper == self.min_ms {
            self.min_ms
        } else {
            rand::rng().random_range(self.min_ms..=upper)
        };
        Duration::from_millis(ms)
    }
}

/// Delay ranges per operation class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Before probing a candidate segment during discovery.
    pub segment_probe: DelayRange,
    /// Before fetching a list page.
    pub page_fetch: DelayRange,
    /// Before each detail lookup inside the fan-out.
    pub detail_fetch: DelayRange,
    /// Between records written to the output file.
    pub record: DelayRange,
    /// After an identity rotation, before the next request.
    pub rotation_settle: DelayRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            segment_probe: DelayRange::new(800, 2_000),
            page_fetch: DelayRange::new(1_000, 3_000),
            detail_fetch: DelayRange::new(150, 600),
            record: DelayRange::new(30, 120),
            rotation_settle: DelayRange::new(3_000, 6_000),
        }
    }
}

/// Issues the jittered pauses between operations.
#[derive(Debug, Clone)]
pub struct Pacer {
    config: PacingConfig,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// A pacer that never sleeps, for tests.
    pub fn disabled() -> Self {
        let zero = DelayRange::new(0, 0);
        Self {
            config: PacingConfig {
                segment_probe: zero,
                page_fetch: zero,
                detail_fetch: zero,
                record: zero,
                rotation_settle: zero,
            },
        }
    }

    pub async fn segment_probe(&self) {
        Self::pause(self.config.segment_probe).await;
    }

    pub async fn page_fetch(&self) {
        Self::pause(self.config.page_fetch).await;
    }

    pub async fn detail_fetch(&self) {
        Self::pause(self.config.detail_fetch).await;
    }

    pub async fn between_records(&self) {
        Self::pause(self.config.record).await;
    }

    pub async fn rotation_settle(&self) {
        Self::pause(self.config.rotation_settle).await;
    }

    async fn pause(range: DelayRange) {
        let delay = range.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_stays_in_range() {
        let range = DelayRange::new(100, 200);
        for _ in 0..50 {
            let d = range.sample();
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_degenerate_range_is_constant() {
        let range = DelayRange::new(50, 50);
        assert_eq!(range.sample(), Duration::from_millis(50));
        // An inverted range collapses to its minimum.
        let inverted = DelayRange::new(80, 20);
        assert_eq!(inverted.sample(), Duration::from_millis(80));
    }
}
