//! Immutable resource → rules index.
//!
//! Built in one go from a full rule list and never mutated afterwards, so a
//! published index can be shared across threads without locking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::rule::{Rule, RuleCompiler, RuleSpec, DEFAULT, OTHER};

#[derive(Debug)]
struct ResourceRules {
    /// Input order.
    rules: Vec<Arc<Rule>>,
    /// Evaluation order: named callers, then [`OTHER`], then [`DEFAULT`].
    checked: Vec<Arc<Rule>>,
    named_callers: Arc<HashSet<String>>,
}

/// Compiled rules grouped by resource.
#[derive(Debug, Default)]
pub struct RuleIndex {
    resources: Vec<(String, ResourceRules)>,
    lookup: HashMap<String, usize>,
    rule_count: usize,
}

impl RuleIndex {
    /// Index with no rules: every resource is unrestricted.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile every spec and group the results by resource.
    ///
    /// Invalid specs are logged and dropped; the rest still compile. Within a
    /// resource the input order is kept.
    pub fn compile_all(specs: &[RuleSpec], compiler: &RuleCompiler) -> Self {
        let mut valid = Vec::with_capacity(specs.len());
        let mut named: HashMap<&str, HashSet<String>> = HashMap::new();

        for spec in specs {
            if let Err(err) = compiler.validate(spec) {
                warn!(
                    target: "flowgate::index",
                    resource = %spec.resource,
                    error = %err,
                    "dropping invalid flow rule"
                );
                continue;
            }
            let callers = named.entry(spec.resource.trim()).or_default();
            let scope = spec.normalized_scope();
            if scope != DEFAULT && scope != OTHER {
                callers.insert(scope.to_string());
            }
            valid.push(spec);
        }

        let named: HashMap<&str, Arc<HashSet<String>>> =
            named.into_iter().map(|(resource, callers)| (resource, Arc::new(callers))).collect();

        let mut index = RuleIndex::default();
        for spec in valid {
            let resource = spec.resource.trim();
            let callers = named.get(resource).cloned().unwrap_or_default();
            match compiler.compile_with_named(spec, callers.clone()) {
                Ok(rule) => index.push(resource, Arc::new(rule), callers),
                Err(err) => warn!(
                    target: "flowgate::index",
                    resource = %spec.resource,
                    error = %err,
                    "dropping invalid flow rule"
                ),
            }
        }

        for (_, group) in &mut index.resources {
            group.checked = group.rules.clone();
            group.checked.sort_by_key(|rule| evaluation_rank(rule));
        }
        index
    }

    fn push(&mut self, resource: &str, rule: Arc<Rule>, named_callers: Arc<HashSet<String>>) {
        let slot = match self.lookup.get(resource) {
            Some(&slot) => slot,
            None => {
                self.resources.push((
                    resource.to_string(),
                    ResourceRules { rules: Vec::new(), checked: Vec::new(), named_callers },
                ));
                let slot = self.resources.len() - 1;
                self.lookup.insert(resource.to_string(), slot);
                slot
            }
        };
        self.resources[slot].1.rules.push(rule);
        self.rule_count += 1;
    }

    fn group(&self, resource: &str) -> Option<&ResourceRules> {
        self.lookup.get(resource).map(|&slot| &self.resources[slot].1)
    }

    /// Rules for `resource` in configuration order; empty if none.
    pub fn rules_for(&self, resource: &str) -> &[Arc<Rule>] {
        self.group(resource).map(|g| g.rules.as_slice()).unwrap_or(&[])
    }

    /// Rules for `resource` in the order admission checks walk them:
    /// caller-specific rules first, then [`OTHER`], then [`DEFAULT`].
    pub fn checked_order(&self, resource: &str) -> &[Arc<Rule>] {
        self.group(resource).map(|g| g.checked.as_slice()).unwrap_or(&[])
    }

    /// Whether any rule targets `resource`.
    pub fn contains_resource(&self, resource: &str) -> bool {
        self.lookup.contains_key(resource)
    }

    /// Every rule, grouped by resource in order of first appearance.
    pub fn all_rules(&self) -> Vec<Arc<Rule>> {
        self.resources.iter().flat_map(|(_, g)| g.rules.iter().cloned()).collect()
    }

    /// Resources with at least one rule, in order of first appearance.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(|(resource, _)| resource.as_str())
    }

    /// True unless some rule of `resource` names `caller` explicitly.
    /// An empty caller is never exempt.
    pub fn is_exempt_caller(&self, caller: &str, resource: &str) -> bool {
        if caller.is_empty() {
            return false;
        }
        match self.group(resource) {
            Some(group) => !group.named_callers.contains(caller),
            None => true,
        }
    }

    /// Total number of compiled rules.
    pub fn len(&self) -> usize {
        self.rule_count
    }

    /// True when no rule compiled.
    pub fn is_empty(&self) -> bool {
        self.rule_count == 0
    }

    /// Number of distinct resources.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

fn evaluation_rank(rule: &Rule) -> u8 {
    match rule.caller_scope() {
        DEFAULT => 2,
        OTHER => 1,
        _ => 0,
    }
}
