//! Per-block property change detection
//!
//! `EvalBlockCache` tracks the current and previously applied property
//! expressions of one block instance and classifies an edit as either
//! "nothing changed", "re-apply some setters", or "recreate the object".
//! A property with no prior recorded value always counts as changed.

use crate::proxy::value::ObjectValue;
use crate::scripting::EvaluatedProperty;
use crate::types::{BlockDescriptor, CallDesc, PropertyResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Evaluates one property expression, recording a type string or error
///
/// The production implementation drives the zone's remote evaluation
/// helper; tests substitute a mock or a plain in-process engine.
#[cfg_attr(test, mockall::automock)]
pub trait PropertyEvaluator {
    fn eval_property(&self, key: &str, expr: &str) -> EvaluatedProperty;
}

/// Change detector for one block instance
#[derive(Default)]
pub struct EvalBlockCache {
    descriptor: Option<Arc<BlockDescriptor>>,
    /// Property expressions from the latest staged snapshot, in order
    current: Vec<(String, String)>,
    /// Expressions last successfully applied; `None` before first commit
    previous: Option<HashMap<String, String>>,
    /// Last evaluation result per property
    results: HashMap<String, PropertyResult>,
    /// Last evaluated value per property, kept for setter arguments
    values: HashMap<String, ObjectValue>,
}

impl EvalBlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the latest descriptor and property snapshot
    pub fn stage(&mut self, descriptor: Arc<BlockDescriptor>, properties: &[(String, String)]) {
        self.descriptor = Some(descriptor);
        self.current = properties.to_vec();
    }

    /// Whether a property differs from its last applied value
    pub fn changed(&self, key: &str) -> bool {
        let current = self.current.iter().find(|(k, _)| k == key).map(|(_, v)| v);
        match (&self.previous, current) {
            (Some(previous), Some(value)) => previous.get(key) != Some(value),
            // No prior recorded value: always treated as changed
            (None, Some(_)) => true,
            // Key no longer present: changed if it used to exist
            (Some(previous), None) => previous.contains_key(key),
            (None, None) => false,
        }
    }

    /// True when any constructor-argument or initializer-referenced
    /// property changed, forcing full object recreation
    pub fn has_critical_change(&self) -> bool {
        match &self.descriptor {
            Some(descriptor) => descriptor
                .critical_keys()
                .iter()
                .any(|key| self.changed(key)),
            None => false,
        }
    }

    /// Declared setter calls whose referenced properties changed, in
    /// declaration order
    pub fn setters_changed_list(&self) -> Vec<CallDesc> {
        match &self.descriptor {
            Some(descriptor) => descriptor
                .setters()
                .filter(|call| call.args.iter().any(|key| self.changed(key)))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Re-evaluate every changed property, recording a type string or an
    /// error per property. Returns false when any property failed.
    pub fn update_changed_properties(&mut self, evaluator: &dyn PropertyEvaluator) -> bool {
        let mut ok = true;
        let staged = self.current.clone();
        for (key, expr) in &staged {
            if !self.changed(key) && self.results.contains_key(key) {
                continue;
            }
            let evaluated = evaluator.eval_property(key, expr);
            ok &= evaluated.result.is_ok();
            if let Some(value) = evaluated.value {
                self.values.insert(key.clone(), value);
            } else if evaluated.result.error.is_some() {
                self.values.remove(key);
            }
            self.results.insert(key.clone(), evaluated.result);
        }
        ok
    }

    /// Forget all applied state; everything counts as changed again
    pub fn reset(&mut self) {
        self.previous = None;
        self.results.clear();
        self.values.clear();
    }

    /// Record the staged snapshot as applied
    pub fn commit(&mut self) {
        self.previous = Some(self.current.iter().cloned().collect());
    }

    /// Last evaluated value of a property
    pub fn value(&self, key: &str) -> Option<&ObjectValue> {
        self.values.get(key)
    }

    /// Last evaluation results per property
    pub fn results(&self) -> &HashMap<String, PropertyResult> {
        &self.results
    }

    /// (key, message) for every property whose evaluation failed
    pub fn property_errors(&self) -> Vec<(String, String)> {
        let mut errors: Vec<(String, String)> = Vec::new();
        for (key, _) in &self.current {
            if let Some(result) = self.results.get(key) {
                if let Some(message) = &result.error {
                    errors.push((key.clone(), message.clone()));
                }
            }
        }
        errors
    }
}
