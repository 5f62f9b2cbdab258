//! Convenient re-exports for common flowgate types.
pub use crate::{
    error::{ConfigSourceError, FlowRejected},
    manager::{ManagerState, RuleManager},
    middleware::{FlowControlError, FlowControlLayer},
    rule::{ControlBehavior, Grade, RuleSpec, DEFAULT, OTHER},
    source::{ConfigSource, DynamicRuleSource, RuleListener},
    stats::{CallContext, StatsNode},
};
