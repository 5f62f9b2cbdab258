//! Rule manager: owns the published index and keeps it in sync with a source.
//!
//! Reloads compile a complete new [`RuleIndex`] off to the side and publish it
//! with a single pointer swap. Admission checks take one snapshot and use it
//! for the whole call, so a concurrent reload is observed either entirely or
//! not at all.
//!
//! ```rust
//! use flowgate::{CallContext, RuleManager, RuleSpec, StatsNode};
//!
//! #[derive(Debug)]
//! struct Idle;
//! impl StatsNode for Idle {
//!     fn current_qps(&self, _: &str) -> f64 { 0.0 }
//!     fn current_concurrency(&self, _: &str) -> u32 { 0 }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = RuleManager::new();
//! manager.load_rules(vec![RuleSpec::qps("orders", 100.0)]);
//! let ctx = CallContext::new("billing");
//! assert!(manager.check_admission("orders", &ctx, &Idle, 1).await.is_ok());
//! # }
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, trace, warn};

use crate::adaptive::DynamicConfig;
use crate::algorithm::Verdict;
use crate::clock::{Clock, MonotonicClock};
use crate::error::{ConfigSourceError, FlowRejected};
use crate::index::RuleIndex;
use crate::rule::{Rule, RuleCompiler, RuleSpec, DEFAULT_COLD_FACTOR};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::source::{ConfigSource, DynamicRuleSource, RuleListener};
use crate::stats::{CallContext, StatsNode};

const STATE_UNINITIALIZED: u8 = 0;
const STATE_ACTIVE: u8 = 1;

/// Lifecycle of a [`RuleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No rule list has been delivered yet; every call is admitted.
    Uninitialized,
    /// At least one rule list has been published.
    Active,
}

/// Listener registered with the bound source. Owns the published index.
#[derive(Debug)]
struct IndexPublisher {
    index: DynamicConfig<RuleIndex>,
    compiler: RuleCompiler,
    reload: Mutex<()>,
    state: AtomicU8,
}

impl IndexPublisher {
    fn reload(&self, specs: &[RuleSpec], event: &'static str) {
        let _guard = self.reload.lock().unwrap_or_else(PoisonError::into_inner);
        let index = RuleIndex::compile_all(specs, &self.compiler);
        let dropped = specs.len() - index.len();
        info!(
            target: "flowgate::manager",
            event,
            rules = index.len(),
            resources = index.resource_count(),
            dropped,
            "publishing flow rules"
        );
        self.index.set(index);
        self.state.store(STATE_ACTIVE, Ordering::Release);
    }
}

impl RuleListener for IndexPublisher {
    fn on_load(&self, specs: &[RuleSpec]) {
        self.reload(specs, "load");
    }

    fn on_update(&self, specs: &[RuleSpec]) {
        self.reload(specs, "update");
    }

    fn on_error(&self, error: &ConfigSourceError) {
        warn!(
            target: "flowgate::manager",
            %error,
            rules = self.index.get().len(),
            "flow rule update failed; keeping current rules"
        );
    }
}

/// Process-wide flow-control entry point.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct RuleManager {
    publisher: Arc<IndexPublisher>,
    source: Mutex<Arc<dyn ConfigSource>>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleManager {
    /// Manager bound to a fresh [`DynamicRuleSource`], using the monotonic
    /// clock and tokio sleeps.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a manager.
    pub fn builder() -> RuleManagerBuilder {
        RuleManagerBuilder::new()
    }

    /// Publish `specs` through the bound source, replacing all current rules.
    ///
    /// Returns `false` when the source already holds an equal list, in which
    /// case nothing is recompiled and algorithm state carries on.
    pub fn load_rules(&self, specs: Vec<RuleSpec>) -> bool {
        self.source().update_value(specs)
    }

    /// Every compiled rule in the current index.
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.publisher.index.get().all_rules()
    }

    /// Snapshot of the current index. Stays valid across later reloads.
    pub fn index(&self) -> Arc<RuleIndex> {
        self.publisher.index.get()
    }

    /// Whether any rule targets `resource`.
    pub fn has_rule_for(&self, resource: &str) -> bool {
        self.publisher.index.get().contains_resource(resource)
    }

    /// True unless some rule of `resource` names `caller` explicitly.
    pub fn is_exempt_caller(&self, caller: &str, resource: &str) -> bool {
        self.publisher.index.get().is_exempt_caller(caller, resource)
    }

    /// Check every rule of `resource` against the call.
    ///
    /// Rules are walked caller-specific first. A queued admission waits on the
    /// configured sleeper before the next rule is consulted; the first
    /// rejection ends the walk.
    pub async fn check_admission(
        &self,
        resource: &str,
        ctx: &CallContext,
        node: &dyn StatsNode,
        weight: u32,
    ) -> Result<(), FlowRejected> {
        let index = self.publisher.index.get();
        let rules = index.checked_order(resource);
        trace!(target: "flowgate::manager", resource, rules = rules.len(), "checking admission");
        for rule in rules {
            if !rule.pass_check(ctx, node, weight, self.sleeper.as_ref()).await {
                return Err(rejection(rule));
            }
        }
        Ok(())
    }

    /// [`check_admission`](Self::check_admission) for synchronous callers;
    /// queued admissions block the current thread.
    pub fn check_admission_blocking(
        &self,
        resource: &str,
        ctx: &CallContext,
        node: &dyn StatsNode,
        weight: u32,
    ) -> Result<(), FlowRejected> {
        let index = self.publisher.index.get();
        for rule in index.checked_order(resource) {
            if !rule.pass_check_blocking(ctx, node, weight) {
                return Err(rejection(rule));
            }
        }
        Ok(())
    }

    /// Decide without waiting.
    ///
    /// On admission returns the delay the caller must observe before
    /// proceeding (zero when none). All rules reserve their slots at the same
    /// instant, so the longest single delay satisfies every one of them and
    /// never exceeds the largest queueing bound involved. Slots reserved by
    /// pacing rules stay reserved whether or not the caller waits.
    pub fn evaluate(
        &self,
        resource: &str,
        ctx: &CallContext,
        node: &dyn StatsNode,
        weight: u32,
    ) -> Result<Duration, FlowRejected> {
        let index = self.publisher.index.get();
        let mut delay = Duration::ZERO;
        for rule in index.checked_order(resource) {
            match rule.evaluate(ctx, node, weight) {
                Verdict::Admit => {}
                Verdict::AdmitAfterDelay(wait) => delay = delay.max(wait),
                Verdict::Reject => return Err(rejection(rule)),
            }
        }
        Ok(delay)
    }

    /// Detach from the current source and subscribe to `source`.
    ///
    /// Serialized against concurrent rebinds. Once this returns the old
    /// source no longer reaches the manager. If `source` holds a value it is
    /// published before returning; otherwise the current rules stay in place
    /// until it delivers one.
    pub fn rebind(&self, source: Arc<dyn ConfigSource>) {
        let mut current = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        let listener = self.listener();
        current.unsubscribe(&listener);
        source.subscribe(listener);
        *current = source;
        info!(target: "flowgate::manager", "rebound flow rule source");
    }

    /// Source currently feeding the manager.
    pub fn source(&self) -> Arc<dyn ConfigSource> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ManagerState {
        match self.publisher.state.load(Ordering::Acquire) {
            STATE_UNINITIALIZED => ManagerState::Uninitialized,
            _ => ManagerState::Active,
        }
    }

    fn listener(&self) -> Arc<dyn RuleListener> {
        self.publisher.clone()
    }
}

impl Drop for RuleManager {
    fn drop(&mut self) {
        let listener = self.listener();
        let source = self.source.get_mut().unwrap_or_else(PoisonError::into_inner);
        source.unsubscribe(&listener);
    }
}

fn rejection(rule: &Rule) -> FlowRejected {
    FlowRejected::new(rule.resource(), rule.caller_scope())
}

/// Builder for [`RuleManager`].
#[derive(Debug)]
pub struct RuleManagerBuilder {
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    source: Option<Arc<dyn ConfigSource>>,
    default_cold_factor: f64,
}

impl Default for RuleManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleManagerBuilder {
    /// Monotonic clock, tokio sleeps, an empty in-process source and a
    /// default cold factor of 3.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
            source: None,
            default_cold_factor: DEFAULT_COLD_FACTOR,
        }
    }

    /// Time source for warm-up and pacing rules.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Source to subscribe to on build.
    pub fn with_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Cold factor for warm-up rules that leave it unset. Values below 1
    /// make such rules fail validation.
    pub fn default_cold_factor(mut self, cold_factor: f64) -> Self {
        self.default_cold_factor = cold_factor;
        self
    }

    /// Build the manager and subscribe it to its source.
    pub fn build(self) -> RuleManager {
        let compiler =
            RuleCompiler::new(self.clock).with_default_cold_factor(self.default_cold_factor);
        let publisher = Arc::new(IndexPublisher {
            index: DynamicConfig::new(RuleIndex::empty()),
            compiler,
            reload: Mutex::new(()),
            state: AtomicU8::new(STATE_UNINITIALIZED),
        });
        let source = self.source.unwrap_or_else(|| Arc::new(DynamicRuleSource::new()));
        source.subscribe(publisher.clone());
        RuleManager { publisher, source: Mutex::new(source), sleeper: self.sleeper }
    }
}
