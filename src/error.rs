//! Error types for rule compilation, admission, and configuration delivery
use thiserror::Error;

/// A rule specification that cannot be compiled.
///
/// Raised per entry; the reload that contained it drops the entry and carries on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Resource name missing or blank.
    #[error("rule resource name must not be empty")]
    EmptyResource,
    /// Threshold negative or not a finite number.
    #[error("rule for '{resource}' has invalid threshold {threshold}")]
    InvalidThreshold {
        /// Resource the rule targets.
        resource: String,
        /// Value provided by the configuration.
        threshold: f64,
    },
    /// Cold factor below 1 or not a finite number.
    #[error("rule for '{resource}' has invalid cold factor {cold_factor} (must be >= 1)")]
    InvalidColdFactor {
        /// Resource the rule targets.
        resource: String,
        /// Value provided by the configuration.
        cold_factor: f64,
    },
}

/// Admission denied by a flow rule.
///
/// A routine outcome under load, not a fault: callers are expected to shed or
/// degrade the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("flow rejected on '{resource}' by rule for '{limit_app}'")]
pub struct FlowRejected {
    /// Resource whose rule rejected the call.
    pub resource: String,
    /// Caller scope of the rejecting rule.
    pub limit_app: String,
}

impl FlowRejected {
    /// Build a rejection attributed to the rule's caller scope.
    pub fn new(resource: impl Into<String>, limit_app: impl Into<String>) -> Self {
        Self { resource: resource.into(), limit_app: limit_app.into() }
    }
}

/// Failure to deliver or decode a rule update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigSourceError {
    /// Payload could not be decoded into rule specifications.
    #[error("failed to parse flow rules: {0}")]
    Parse(String),
    /// The source could not obtain an update at all.
    #[error("failed to deliver flow rules: {0}")]
    Delivery(String),
}

impl From<serde_json::Error> for ConfigSourceError {
    fn from(err: serde_json::Error) -> Self {
        ConfigSourceError::Parse(err.to_string())
    }
}
