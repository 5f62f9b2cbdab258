//! Read-only view of the statistics backend and the per-call context.
//!
//! The sliding-window counters live outside this crate; rules only read the
//! current numbers through [`StatsNode`].

use std::sync::Arc;

/// Current usage counters, as maintained by the host's statistics window.
pub trait StatsNode: Send + Sync + std::fmt::Debug {
    /// Requests per second currently passing for `resource`.
    fn current_qps(&self, resource: &str) -> f64;
    /// Calls currently in flight for `resource`.
    fn current_concurrency(&self, resource: &str) -> u32;
}

/// Identity of the caller making the current invocation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    caller: String,
    origin_node: Option<Arc<dyn StatsNode>>,
}

impl CallContext {
    /// Context for `caller`. An empty id means the caller is unknown.
    pub fn new(caller: impl Into<String>) -> Self {
        Self { caller: caller.into(), origin_node: None }
    }

    /// Context with no caller identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Attach the statistics node tracking this caller's own traffic.
    ///
    /// Caller-scoped rules read it instead of the resource-wide node.
    pub fn with_origin_node(mut self, node: Arc<dyn StatsNode>) -> Self {
        self.origin_node = Some(node);
        self
    }

    /// Caller id, possibly empty.
    pub fn caller(&self) -> &str {
        &self.caller
    }

    /// Per-caller statistics, if the host tracks them.
    pub fn origin_node(&self) -> Option<&dyn StatsNode> {
        self.origin_node.as_deref()
    }
}
