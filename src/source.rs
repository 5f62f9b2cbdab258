//! Observable rule sources.
//!
//! A [`ConfigSource`] holds the latest full rule list and pushes it to its
//! subscribers: once on subscription (if it holds a value) and again on every
//! change, in order. Transports that fetch rules from elsewhere feed a source;
//! the manager only ever talks to the source.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::adaptive::DynamicConfig;
use crate::error::ConfigSourceError;
use crate::rule::RuleSpec;

/// Receiver of rule lists pushed by a [`ConfigSource`].
pub trait RuleListener: Send + Sync + std::fmt::Debug {
    /// Initial value, delivered when subscribing to a source that holds one.
    fn on_load(&self, specs: &[RuleSpec]);
    /// A new value replaced the previous one.
    fn on_update(&self, specs: &[RuleSpec]);
    /// The source failed to obtain or decode an update. The previous value stands.
    fn on_error(&self, error: &ConfigSourceError) {
        warn!(target: "flowgate::source", %error, "flow rule source reported an error");
    }
}

/// Subscribe/notify contract for rule configuration.
pub trait ConfigSource: Send + Sync + std::fmt::Debug {
    /// Register `listener` and deliver the current value to it, if any.
    /// Registering the same listener twice has no effect.
    fn subscribe(&self, listener: Arc<dyn RuleListener>);
    /// Stop delivering to `listener`. Once this returns no further
    /// notification reaches it.
    fn unsubscribe(&self, listener: &Arc<dyn RuleListener>);
    /// Latest rule list, or `None` if the source never held one.
    fn current_value(&self) -> Option<Vec<RuleSpec>>;
    /// Replace the rule list and notify subscribers. Returns `false` (and
    /// notifies nobody) when the list equals the current one.
    fn update_value(&self, specs: Vec<RuleSpec>) -> bool;
}

/// In-process source; also the default source of a
/// [`RuleManager`](crate::RuleManager).
///
/// Clones share the same value and subscribers. Notifications are delivered
/// synchronously on the updating thread, serialized by the subscriber lock.
#[derive(Debug, Clone, Default)]
pub struct DynamicRuleSource {
    value: DynamicConfig<Option<Vec<RuleSpec>>>,
    listeners: Arc<Mutex<Vec<Arc<dyn RuleListener>>>>,
}

impl DynamicRuleSource {
    /// Source holding no value yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-populated with `specs`.
    pub fn with_rules(specs: Vec<RuleSpec>) -> Self {
        Self { value: DynamicConfig::new(Some(specs)), listeners: Arc::default() }
    }

    /// Decode a JSON rule array and publish it.
    ///
    /// A malformed payload is reported to subscribers through
    /// [`RuleListener::on_error`] and leaves the current value in place.
    pub fn update_json(&self, json: &str) -> Result<bool, ConfigSourceError> {
        match RuleSpec::parse_list(json) {
            Ok(specs) => Ok(self.update_value(specs)),
            Err(err) => {
                self.report_error(&err);
                Err(err)
            }
        }
    }

    /// Forward a transport failure to subscribers.
    pub fn report_error(&self, error: &ConfigSourceError) {
        let listeners = self.lock_listeners();
        for listener in listeners.iter() {
            listener.on_error(error);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn RuleListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConfigSource for DynamicRuleSource {
    fn subscribe(&self, listener: Arc<dyn RuleListener>) {
        let mut listeners = self.lock_listeners();
        if listeners.iter().any(|existing| same_listener(existing, &listener)) {
            return;
        }
        if let Some(specs) = self.value.get().as_ref() {
            listener.on_load(specs);
        }
        listeners.push(listener);
        debug!(target: "flowgate::source", listeners = listeners.len(), "listener subscribed");
    }

    fn unsubscribe(&self, listener: &Arc<dyn RuleListener>) {
        let mut listeners = self.lock_listeners();
        listeners.retain(|existing| !same_listener(existing, listener));
    }

    fn current_value(&self) -> Option<Vec<RuleSpec>> {
        self.value.get().as_ref().clone()
    }

    fn update_value(&self, specs: Vec<RuleSpec>) -> bool {
        let listeners = self.lock_listeners();
        if self.value.get().as_ref().as_ref() == Some(&specs) {
            debug!(target: "flowgate::source", "rule list unchanged; not notifying");
            return false;
        }
        self.value.set(Some(specs));
        let snapshot = self.value.get();
        if let Some(specs) = snapshot.as_ref() {
            for listener in listeners.iter() {
                listener.on_update(specs);
            }
        }
        true
    }
}

/// Identity comparison on the data pointer only; vtable pointers of the same
/// type may differ between codegen units.
fn same_listener(a: &Arc<dyn RuleListener>, b: &Arc<dyn RuleListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
