//! Flow rules: wire format, validation, and compiled form.
//!
//! A [`RuleSpec`] is the configuration record as delivered by a rule source.
//! [`RuleCompiler`] turns it into a [`Rule`] bound to a fresh
//! [`RateAlgorithm`] instance. Compiled rules are never mutated; reloading
//! configuration compiles new ones, which also resets algorithm state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algorithm::{
    PacingController, RateAlgorithm, ThresholdController, Verdict, WarmUpController,
};
use crate::clock::{Clock, MonotonicClock};
use crate::error::{ConfigSourceError, ValidationError};
use crate::sleeper::Sleeper;
use crate::stats::{CallContext, StatsNode};

/// Caller scope matching every caller.
pub const DEFAULT: &str = "default";
/// Caller scope matching callers that no rule of the same resource names.
pub const OTHER: &str = "other";
/// Cold factor used when a warm-up rule does not set one.
pub const DEFAULT_COLD_FACTOR: f64 = 3.0;

/// What the threshold bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    /// Requests per second.
    #[default]
    Qps,
    /// Calls in flight.
    ConcurrentThreads,
}

/// How a QPS rule shapes traffic over its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlBehavior {
    /// Reject as soon as the threshold would be exceeded.
    #[default]
    ImmediateReject,
    /// Ramp the threshold up after a cold start.
    WarmUp,
    /// Queue calls to an even pace, rejecting beyond a delay bound.
    Queueing,
}

/// One rule as delivered by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    /// Protected resource.
    pub resource: String,
    /// Caller the rule is limited to; blank means [`DEFAULT`].
    #[serde(default, alias = "limitApp", skip_serializing_if = "Option::is_none")]
    pub caller_scope: Option<String>,
    /// What `threshold` bounds.
    #[serde(default)]
    pub grade: Grade,
    /// The limit.
    #[serde(alias = "count")]
    pub threshold: f64,
    /// Traffic shaping behavior.
    #[serde(default, alias = "controlBehavior")]
    pub behavior: ControlBehavior,
    /// Ramp length for [`ControlBehavior::WarmUp`].
    #[serde(default, rename = "warmUpPeriodSeconds", alias = "warmUpPeriodSec")]
    pub warm_up_period_secs: u32,
    /// Delay bound for [`ControlBehavior::Queueing`].
    #[serde(default)]
    pub max_queueing_time_ms: u64,
    /// Ratio between the warm and cold rates; defaults to the compiler's setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_factor: Option<f64>,
}

impl RuleSpec {
    /// QPS rule rejecting immediately above `threshold`.
    pub fn qps(resource: impl Into<String>, threshold: f64) -> Self {
        Self {
            resource: resource.into(),
            caller_scope: None,
            grade: Grade::Qps,
            threshold,
            behavior: ControlBehavior::ImmediateReject,
            warm_up_period_secs: 0,
            max_queueing_time_ms: 0,
            cold_factor: None,
        }
    }

    /// Rule bounding in-flight calls.
    pub fn concurrent_threads(resource: impl Into<String>, threshold: f64) -> Self {
        Self { grade: Grade::ConcurrentThreads, ..Self::qps(resource, threshold) }
    }

    /// Limit the rule to one caller (or [`DEFAULT`] / [`OTHER`]).
    pub fn with_caller(mut self, scope: impl Into<String>) -> Self {
        self.caller_scope = Some(scope.into());
        self
    }

    /// Switch to warm-up shaping.
    pub fn warm_up(mut self, period_secs: u32, cold_factor: Option<f64>) -> Self {
        self.behavior = ControlBehavior::WarmUp;
        self.warm_up_period_secs = period_secs;
        self.cold_factor = cold_factor;
        self
    }

    /// Switch to paced queueing.
    pub fn queueing(mut self, max_queueing_time_ms: u64) -> Self {
        self.behavior = ControlBehavior::Queueing;
        self.max_queueing_time_ms = max_queueing_time_ms;
        self
    }

    /// Parse a JSON array of rules.
    pub fn parse_list(json: &str) -> Result<Vec<RuleSpec>, ConfigSourceError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Caller scope after normalization: blank becomes [`DEFAULT`].
    pub fn normalized_scope(&self) -> &str {
        match self.caller_scope.as_deref().map(str::trim) {
            Some(scope) if !scope.is_empty() => scope,
            _ => DEFAULT,
        }
    }

    fn uses_warm_up(&self) -> bool {
        self.grade == Grade::Qps
            && self.behavior == ControlBehavior::WarmUp
            && self.warm_up_period_secs > 0
    }

    fn uses_pacing(&self) -> bool {
        self.grade == Grade::Qps
            && self.behavior == ControlBehavior::Queueing
            && self.max_queueing_time_ms > 0
    }
}

/// Compiles specs into rules with fresh algorithm state.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    clock: Arc<dyn Clock>,
    default_cold_factor: f64,
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(Arc::new(MonotonicClock::default()))
    }
}

impl RuleCompiler {
    /// Compiler whose time-based algorithms read `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, default_cold_factor: DEFAULT_COLD_FACTOR }
    }

    /// Cold factor for warm-up specs that leave it unset.
    pub fn with_default_cold_factor(mut self, cold_factor: f64) -> Self {
        self.default_cold_factor = cold_factor;
        self
    }

    /// Check a spec without building anything.
    pub fn validate(&self, spec: &RuleSpec) -> Result<(), ValidationError> {
        let resource = spec.resource.trim();
        if resource.is_empty() {
            return Err(ValidationError::EmptyResource);
        }
        if !spec.threshold.is_finite() || spec.threshold < 0.0 {
            return Err(ValidationError::InvalidThreshold {
                resource: resource.to_string(),
                threshold: spec.threshold,
            });
        }
        if spec.uses_warm_up() {
            let cold_factor = self.cold_factor_for(spec);
            if !cold_factor.is_finite() || cold_factor < 1.0 {
                return Err(ValidationError::InvalidColdFactor {
                    resource: resource.to_string(),
                    cold_factor,
                });
            }
        }
        Ok(())
    }

    /// Compile a standalone rule. An [`OTHER`] rule compiled this way
    /// applies to every identified caller but its own scope.
    pub fn compile(&self, spec: &RuleSpec) -> Result<Rule, ValidationError> {
        self.compile_with_named(spec, Arc::default())
    }

    /// Compile with the set of callers that rules of the same resource name explicitly.
    pub(crate) fn compile_with_named(
        &self,
        spec: &RuleSpec,
        named_callers: Arc<HashSet<String>>,
    ) -> Result<Rule, ValidationError> {
        self.validate(spec)?;

        let threshold = spec.threshold;
        let cold_factor = self.cold_factor_for(spec);
        let algorithm = if spec.uses_warm_up() {
            RateAlgorithm::WarmUp(WarmUpController::new(
                threshold,
                spec.warm_up_period_secs,
                cold_factor,
                self.clock.clone(),
            ))
        } else if spec.uses_pacing() {
            RateAlgorithm::Pacing(PacingController::new(
                threshold,
                spec.max_queueing_time_ms,
                self.clock.clone(),
            ))
        } else {
            RateAlgorithm::Threshold(ThresholdController::new(threshold))
        };

        Ok(Rule {
            resource: spec.resource.trim().to_string(),
            caller_scope: spec.normalized_scope().to_string(),
            grade: spec.grade,
            threshold,
            behavior: spec.behavior,
            warm_up_period_secs: spec.warm_up_period_secs,
            cold_factor,
            max_queueing_time_ms: spec.max_queueing_time_ms,
            named_callers,
            algorithm,
        })
    }

    fn cold_factor_for(&self, spec: &RuleSpec) -> f64 {
        spec.cold_factor.unwrap_or(self.default_cold_factor)
    }
}

/// Compiled rule bound to its own algorithm instance.
#[derive(Debug)]
pub struct Rule {
    resource: String,
    caller_scope: String,
    grade: Grade,
    threshold: f64,
    behavior: ControlBehavior,
    warm_up_period_secs: u32,
    cold_factor: f64,
    max_queueing_time_ms: u64,
    named_callers: Arc<HashSet<String>>,
    algorithm: RateAlgorithm,
}

impl Rule {
    /// Protected resource.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Normalized caller scope.
    pub fn caller_scope(&self) -> &str {
        &self.caller_scope
    }

    /// What the threshold bounds.
    pub fn grade(&self) -> Grade {
        self.grade
    }

    /// The limit.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Behavior as configured (see [`Rule::algorithm`] for what runs).
    pub fn behavior(&self) -> ControlBehavior {
        self.behavior
    }

    /// Configured warm-up period.
    pub fn warm_up_period_secs(&self) -> u32 {
        self.warm_up_period_secs
    }

    /// Effective cold factor.
    pub fn cold_factor(&self) -> f64 {
        self.cold_factor
    }

    /// Configured queueing bound.
    pub fn max_queueing_time(&self) -> Duration {
        Duration::from_millis(self.max_queueing_time_ms)
    }

    /// Algorithm selected at compile time.
    pub fn algorithm(&self) -> &RateAlgorithm {
        &self.algorithm
    }

    /// True when the scope is a concrete caller rather than a sentinel.
    pub fn names_caller(&self) -> bool {
        self.caller_scope != DEFAULT && self.caller_scope != OTHER
    }

    /// Decide on the call without waiting.
    ///
    /// Rules that do not apply to the caller admit.
    pub fn evaluate(&self, ctx: &CallContext, node: &dyn StatsNode, weight: u32) -> Verdict {
        let Some(selected) = self.select_node(ctx, node) else {
            return Verdict::Admit;
        };
        let usage = match self.grade {
            Grade::Qps => selected.current_qps(&self.resource),
            Grade::ConcurrentThreads => f64::from(selected.current_concurrency(&self.resource)),
        };
        let verdict = self.algorithm.evaluate(usage, weight);
        match verdict {
            Verdict::Reject => debug!(
                target: "flowgate::rule",
                resource = %self.resource,
                limit_app = %self.caller_scope,
                algorithm = self.algorithm.kind(),
                usage,
                weight,
                "flow rule rejected call"
            ),
            Verdict::AdmitAfterDelay(wait) => debug!(
                target: "flowgate::rule",
                resource = %self.resource,
                wait_ms = wait.as_millis() as u64,
                "flow rule queued call"
            ),
            Verdict::Admit => {}
        }
        verdict
    }

    /// Decide and, for a queued admission, wait through `sleeper`.
    ///
    /// Dropping the future abandons the wait; the reserved slot is not returned.
    pub async fn pass_check(
        &self,
        ctx: &CallContext,
        node: &dyn StatsNode,
        weight: u32,
        sleeper: &dyn Sleeper,
    ) -> bool {
        match self.evaluate(ctx, node, weight) {
            Verdict::Admit => true,
            Verdict::AdmitAfterDelay(wait) => {
                sleeper.sleep(wait).await;
                true
            }
            Verdict::Reject => false,
        }
    }

    /// Decide and, for a queued admission, block the current thread.
    pub fn pass_check_blocking(&self, ctx: &CallContext, node: &dyn StatsNode, weight: u32) -> bool {
        match self.evaluate(ctx, node, weight) {
            Verdict::Admit => true,
            Verdict::AdmitAfterDelay(wait) => {
                std::thread::sleep(wait);
                true
            }
            Verdict::Reject => false,
        }
    }

    /// Pick the counters this rule is judged against, or `None` if it does not apply.
    fn select_node<'a>(
        &self,
        ctx: &'a CallContext,
        node: &'a dyn StatsNode,
    ) -> Option<&'a dyn StatsNode> {
        let caller = ctx.caller();
        if !caller.is_empty() && caller == self.caller_scope {
            return Some(ctx.origin_node().unwrap_or(node));
        }
        if self.caller_scope == DEFAULT {
            return Some(node);
        }
        if self.caller_scope == OTHER && !caller.is_empty() && !self.named_callers.contains(caller)
        {
            return Some(ctx.origin_node().unwrap_or(node));
        }
        None
    }
}
