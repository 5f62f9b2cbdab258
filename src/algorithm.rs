//! Admission algorithms.
//!
//! Every compiled rule owns exactly one [`RateAlgorithm`]. The algorithm turns
//! the current usage read from the statistics node plus the weight of the
//! incoming call into a [`Verdict`]:
//!
//! - [`ThresholdController`]: plain `usage + weight <= threshold` check.
//! - [`WarmUpController`]: threshold that ramps up from `threshold / cold_factor`.
//! - [`PacingController`]: leaky bucket that queues calls instead of rejecting them.
//!
//! Algorithms never sleep. A queued admission is reported as
//! [`Verdict::AdmitAfterDelay`] and the caller decides how to wait, which keeps
//! the same rule usable from async and blocking call sites.

use std::time::Duration;

pub mod pacing;
pub mod threshold;
pub mod warm_up;

pub use pacing::PacingController;
pub use threshold::ThresholdController;
pub use warm_up::WarmUpController;

/// Outcome of a single algorithm evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed now.
    Admit,
    /// Deny the call.
    Reject,
    /// Proceed once the given delay has elapsed. The slot is already reserved.
    AdmitAfterDelay(Duration),
}

impl Verdict {
    /// True for both immediate and delayed admission.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Verdict::Reject)
    }

    /// Delay attached to a queued admission, if any.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Verdict::AdmitAfterDelay(wait) => Some(*wait),
            _ => None,
        }
    }
}

/// Decision procedure bound to one rule, holding that rule's runtime state.
#[derive(Debug)]
pub enum RateAlgorithm {
    /// Reject as soon as the threshold would be exceeded.
    Threshold(ThresholdController),
    /// Ramp the threshold up after a cold start.
    WarmUp(WarmUpController),
    /// Space admissions evenly, queueing up to a bound.
    Pacing(PacingController),
}

impl RateAlgorithm {
    /// Decide on a call of `weight` units given the usage currently observed.
    ///
    /// `current_usage` is requests/second or in-flight calls, matching the
    /// rule's grade. Pacing ignores it and relies on its own watermark.
    pub fn evaluate(&self, current_usage: f64, weight: u32) -> Verdict {
        match self {
            RateAlgorithm::Threshold(c) => c.evaluate(current_usage, weight),
            RateAlgorithm::WarmUp(c) => c.evaluate(current_usage, weight),
            RateAlgorithm::Pacing(c) => c.evaluate(weight),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RateAlgorithm::Threshold(_) => "threshold",
            RateAlgorithm::WarmUp(_) => "warm_up",
            RateAlgorithm::Pacing(_) => "pacing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn verdict_helpers() {
        assert!(Verdict::Admit.is_admitted());
        assert!(!Verdict::Reject.is_admitted());
        let queued = Verdict::AdmitAfterDelay(Duration::from_millis(20));
        assert!(queued.is_admitted());
        assert_eq!(queued.delay(), Some(Duration::from_millis(20)));
        assert_eq!(Verdict::Admit.delay(), None);
    }

    #[test]
    fn dispatch_reaches_each_variant() {
        let clock = Arc::new(ManualClock::new(1_000));

        let threshold = RateAlgorithm::Threshold(ThresholdController::new(1.0));
        assert_eq!(threshold.evaluate(0.0, 1), Verdict::Admit);
        assert_eq!(threshold.kind(), "threshold");

        let warm = RateAlgorithm::WarmUp(WarmUpController::new(9.0, 10, 3.0, clock.clone()));
        assert_eq!(warm.evaluate(2.0, 1), Verdict::Admit);
        assert_eq!(warm.evaluate(3.0, 1), Verdict::Reject);
        assert_eq!(warm.kind(), "warm_up");

        let pacing = RateAlgorithm::Pacing(PacingController::new(1.0, 0, clock));
        assert_eq!(pacing.evaluate(1_000.0, 1), Verdict::Admit);
        assert_eq!(pacing.evaluate(0.0, 1), Verdict::Reject);
        assert_eq!(pacing.kind(), "pacing");
    }
}
