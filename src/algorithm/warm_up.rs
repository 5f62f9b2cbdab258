//! Warm-up ramp.
//!
//! A freshly compiled rule starts cold with a full bucket of
//! `threshold * warm_up_period_secs` cold tokens. Elapsed time drains the
//! bucket at the target rate, and admitted weight drains it further. The
//! allowed rate is linear in the remaining fill:
//!
//! ```text
//! allowed = threshold - (threshold - threshold / cold_factor) * (tokens / capacity)
//! ```
//!
//! so a full bucket allows `threshold / cold_factor` and an empty one allows
//! `threshold`. With no traffic the bucket is empty exactly
//! `warm_up_period_secs` after compilation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::Verdict;
use crate::clock::Clock;

/// Threshold that ramps from `threshold / cold_factor` up to `threshold`.
#[derive(Debug)]
pub struct WarmUpController {
    threshold: f64,
    cold_rate: f64,
    capacity: f64,
    /// Remaining cold tokens, stored as `f64` bits.
    cold_tokens: AtomicU64,
    last_sync_millis: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl WarmUpController {
    /// Create a cold controller. The ramp starts at the clock's current time.
    pub fn new(
        threshold: f64,
        warm_up_period_secs: u32,
        cold_factor: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = threshold * f64::from(warm_up_period_secs);
        let now = clock.now_millis();
        Self {
            threshold,
            cold_rate: threshold / cold_factor,
            capacity,
            cold_tokens: AtomicU64::new(capacity.to_bits()),
            last_sync_millis: AtomicU64::new(now),
            clock,
        }
    }

    /// Target rate reached once warm.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Rate allowed right now.
    pub fn allowed_rate(&self) -> f64 {
        let tokens = self.sync();
        self.rate_for(tokens)
    }

    /// Cold tokens left after draining for elapsed time.
    pub fn cold_tokens(&self) -> f64 {
        self.sync()
    }

    /// Admit iff the call fits under the current allowed rate; admitted weight
    /// drains the bucket.
    pub fn evaluate(&self, current_usage: f64, weight: u32) -> Verdict {
        let allowed = self.allowed_rate();
        let requested = f64::from(weight);
        if current_usage + requested <= allowed {
            self.drain(requested);
            Verdict::Admit
        } else {
            Verdict::Reject
        }
    }

    fn rate_for(&self, tokens: f64) -> f64 {
        if self.capacity <= 0.0 {
            return self.threshold;
        }
        let coldness = (tokens / self.capacity).clamp(0.0, 1.0);
        self.threshold - (self.threshold - self.cold_rate) * coldness
    }

    /// Drain for the time elapsed since the last sync. Only the thread that
    /// wins the timestamp swap drains a given interval.
    fn sync(&self) -> f64 {
        let now = self.clock.now_millis();
        let last = self.last_sync_millis.load(Ordering::Acquire);
        if now > last
            && self
                .last_sync_millis
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            // u64 -> f64 loses precision only past 2^53 ms.
            let elapsed = (now - last) as f64;
            self.drain(elapsed * self.threshold / 1_000.0);
        }
        f64::from_bits(self.cold_tokens.load(Ordering::Acquire))
    }

    fn drain(&self, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        // The closure never declines, so the update always lands.
        let _ = self.cold_tokens.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            Some((f64::from_bits(bits) - amount).max(0.0).to_bits())
        });
    }
}
