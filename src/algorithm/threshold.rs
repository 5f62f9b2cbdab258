use super::Verdict;

/// Fixed ceiling on requests/second or in-flight calls.
///
/// Stateless: the usage comes from the statistics node on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdController {
    threshold: f64,
}

impl ThresholdController {
    /// Create a controller admitting while `usage + weight <= threshold`.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Configured ceiling.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Admit iff the call fits under the ceiling.
    pub fn evaluate(&self, current_usage: f64, weight: u32) -> Verdict {
        if current_usage + f64::from(weight) <= self.threshold {
            Verdict::Admit
        } else {
            Verdict::Reject
        }
    }
}
