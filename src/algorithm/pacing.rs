//! Leaky-bucket pacing.
//!
//! Admissions are spaced `ceil(weight * 1_000_000 / threshold)` microseconds
//! apart behind a single watermark holding the time of the last reserved slot.
//! The watermark runs in microseconds so rates above 1000/s keep their
//! spacing; the clock itself still ticks in milliseconds. A
//! call whose slot lies in the future is admitted with the corresponding
//! delay as long as that delay stays within `max_queueing_ms`; otherwise it
//! is rejected and the watermark is left untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::Verdict;
use crate::clock::Clock;

/// Watermark value before the first admission.
const NEVER: u64 = u64::MAX;

const MICROS_PER_MILLI: u64 = 1_000;

/// Uniform-spacing limiter with bounded queueing delay.
#[derive(Debug)]
pub struct PacingController {
    threshold: f64,
    max_queueing_ms: u64,
    latest_passed_micros: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl PacingController {
    /// Create a pacer admitting `threshold` units per second on average.
    pub fn new(threshold: f64, max_queueing_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self { threshold, max_queueing_ms, latest_passed_micros: AtomicU64::new(NEVER), clock }
    }

    /// Average admission rate.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Longest delay handed out.
    pub fn max_queueing(&self) -> Duration {
        Duration::from_millis(self.max_queueing_ms)
    }

    /// Time of the last reserved slot, if any call has been admitted.
    pub fn latest_passed_millis(&self) -> Option<u64> {
        match self.latest_passed_micros.load(Ordering::Acquire) {
            NEVER => None,
            at => Some(at / MICROS_PER_MILLI),
        }
    }

    /// Reserve a slot for `weight` units.
    pub fn evaluate(&self, weight: u32) -> Verdict {
        if weight == 0 {
            return Verdict::Admit;
        }
        let Some(cost) = self.cost_micros(weight) else {
            return Verdict::Reject;
        };
        let now = self.clock.now_millis().saturating_mul(MICROS_PER_MILLI);
        let max_wait = self.max_queueing_ms.saturating_mul(MICROS_PER_MILLI);

        loop {
            let latest = self.latest_passed_micros.load(Ordering::Acquire);
            let slot = if latest == NEVER { now } else { latest.saturating_add(cost) };

            let (target, verdict) = if slot <= now {
                (now, Verdict::Admit)
            } else {
                let wait = slot - now;
                if wait > max_wait {
                    return Verdict::Reject;
                }
                (slot, Verdict::AdmitAfterDelay(Duration::from_micros(wait)))
            };

            if self
                .latest_passed_micros
                .compare_exchange_weak(latest, target, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return verdict;
            }
        }
    }

    /// Spacing consumed by `weight` units, rounded up so the per-second bound holds.
    /// `None` when the rate admits nothing.
    fn cost_micros(&self, weight: u32) -> Option<u64> {
        if self.threshold <= 0.0 || self.threshold.is_nan() {
            return None;
        }
        let cost = (f64::from(weight) * 1_000_000.0 / self.threshold).ceil();
        // Saturating float-to-int cast: absurdly small rates cost u64::MAX.
        Some(cost as u64)
    }
}
