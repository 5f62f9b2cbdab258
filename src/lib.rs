#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # flowgate
//!
//! Rule-driven flow control for Rust services: per-resource admission rules
//! with immediate-reject, warm-up and paced-queueing traffic shaping, hot
//! reloaded from a pluggable configuration source.
//!
//! ## Features
//!
//! - **Threshold** rules bounding requests per second or calls in flight
//! - **Warm-up** rules ramping a cold resource up to its full rate
//! - **Pacing** rules spacing calls evenly with a bounded queueing delay
//! - **Caller scopes** limiting a rule to one caller, to unnamed callers, or to everyone
//! - **Atomic reloads**: admission checks never see a half-applied rule set
//! - **Lock-free hot path** using atomics
//! - **Tower middleware** guarding any service
//!
//! ## Quick Start
//!
//! ```rust
//! use flowgate::{CallContext, RuleManager, RuleSpec, StatsNode};
//!
//! #[derive(Debug)]
//! struct Window { qps: f64 }
//! impl StatsNode for Window {
//!     fn current_qps(&self, _resource: &str) -> f64 { self.qps }
//!     fn current_concurrency(&self, _resource: &str) -> u32 { 0 }
//! }
//!
//! let manager = RuleManager::new();
//! manager.load_rules(vec![RuleSpec::qps("orders", 5.0)]);
//!
//! let ctx = CallContext::new("billing");
//! assert!(manager.check_admission_blocking("orders", &ctx, &Window { qps: 4.0 }, 1).is_ok());
//! assert!(manager.check_admission_blocking("orders", &ctx, &Window { qps: 5.0 }, 1).is_err());
//! ```

pub mod adaptive;
pub mod algorithm;
pub mod clock;
pub mod error;
pub mod index;
pub mod manager;
pub mod middleware;
pub mod prelude;
pub mod rule;
pub mod sleeper;
pub mod source;
pub mod stats;

// Re-exports
pub use adaptive::DynamicConfig;
pub use algorithm::{PacingController, RateAlgorithm, ThresholdController, Verdict, WarmUpController};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{ConfigSourceError, FlowRejected, ValidationError};
pub use index::RuleIndex;
pub use manager::{ManagerState, RuleManager, RuleManagerBuilder};
pub use middleware::{
    AnonymousCaller, CallerExtractor, FlowControlError, FlowControlLayer, FlowControlService,
};
pub use rule::{ControlBehavior, Grade, Rule, RuleCompiler, RuleSpec, DEFAULT, OTHER};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use source::{ConfigSource, DynamicRuleSource, RuleListener};
pub use stats::{CallContext, StatsNode};
