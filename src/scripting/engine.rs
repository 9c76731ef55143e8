//! Expression engine implementation

use crate::proxy::value::ObjectValue;
use crate::types::PropertyResult;
use rhai::{Dynamic, Engine, Scope};

/// Outcome of evaluating one property expression
///
/// The `result` travels to the editor; the `value`, when the expression
/// produced something the value model can carry, feeds constructor and
/// setter arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedProperty {
    pub result: PropertyResult,
    pub value: Option<ObjectValue>,
}

impl EvaluatedProperty {
    /// Failed evaluation carrying the error message
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: PropertyResult::err(message),
            value: None,
        }
    }
}

/// Safety-limited rhai engine with a persistent scope
pub struct ExpressionEngine {
    engine: Engine,
    scope: Scope<'static>,
}

impl ExpressionEngine {
    /// Create a new engine with default configuration
    pub fn new() -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self {
            engine,
            scope: Scope::new(),
        }
    }

    /// Configure the rhai engine with helper functions and safety limits
    fn configure_engine(engine: &mut Engine) {
        // Set safety limits
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(100_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(1_000);

        engine.register_fn("pi", || -> f64 { std::f64::consts::PI });

        // Decibel conversions, common in dataflow property expressions
        engine.register_fn("db20", |x: f64| -> f64 { 20.0 * x.abs().log10() });
        engine.register_fn("db10", |x: f64| -> f64 { 10.0 * x.abs().log10() });
        engine.register_fn("from_db20", |x: f64| -> f64 { 10f64.powf(x / 20.0) });
        engine.register_fn("from_db10", |x: f64| -> f64 { 10f64.powf(x / 10.0) });
    }

    /// Bind a named value into the scope
    pub fn bind(&mut self, key: &str, value: &ObjectValue) {
        self.scope.set_value(key.to_string(), value.to_dynamic());
    }

    /// Evaluate one property expression
    ///
    /// On success the result is bound into the scope under `key` so later
    /// expressions can reference it.
    pub fn eval_property(&mut self, key: &str, expr: &str) -> EvaluatedProperty {
        let dynamic: Dynamic = match self.engine.eval_with_scope(&mut self.scope, expr) {
            Ok(d) => d,
            Err(e) => {
                tracing::trace!("Property '{}' failed to evaluate: {}", key, e);
                return EvaluatedProperty::err(e.to_string());
            }
        };

        let value = ObjectValue::from_dynamic(&dynamic);
        let (type_string, display_string) = match &value {
            Some(v) => (v.type_string().to_string(), v.display_string()),
            // Unrepresentable types still get a typed preview
            None => (dynamic.type_name().to_string(), dynamic.to_string()),
        };

        if let Some(v) = &value {
            self.bind(key, v);
        }

        EvaluatedProperty {
            result: PropertyResult::ok(type_string, display_string),
            value,
        }
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_expression() {
        let mut engine = ExpressionEngine::new();
        let eval = engine.eval_property("rate", "2.0 * 4.0");
        assert_eq!(eval.result.type_string, "f64");
        assert_eq!(eval.value, Some(ObjectValue::Float(8.0)));
    }

    #[test]
    fn test_string_expression() {
        let mut engine = ExpressionEngine::new();
        let eval = engine.eval_property("dtype", "\"float32\"");
        assert_eq!(eval.result.type_string, "string");
        assert_eq!(eval.result.display_string, "float32");
    }

    #[test]
    fn test_array_expression() {
        let mut engine = ExpressionEngine::new();
        let eval = engine.eval_property("taps", "[1, 0, -1]");
        assert_eq!(eval.result.type_string, "array");
        assert_eq!(
            eval.value,
            Some(ObjectValue::List(vec![
                ObjectValue::Int(1),
                ObjectValue::Int(0),
                ObjectValue::Int(-1),
            ]))
        );
    }

    #[test]
    fn test_error_captured_not_thrown() {
        let mut engine = ExpressionEngine::new();
        let eval = engine.eval_property("bad", "nonsense(");
        assert!(eval.result.error.is_some());
        assert!(eval.value.is_none());
    }

    #[test]
    fn test_later_property_references_earlier() {
        let mut engine = ExpressionEngine::new();
        let first = engine.eval_property("decim", "4");
        assert!(first.result.is_ok());
        let second = engine.eval_property("rate", "1000 / decim");
        assert_eq!(second.value, Some(ObjectValue::Int(250)));
    }

    #[test]
    fn test_db_helpers() {
        let mut engine = ExpressionEngine::new();
        let eval = engine.eval_property("gain", "db20(10.0)");
        match eval.value {
            Some(ObjectValue::Float(f)) => assert!((f - 20.0).abs() < 1e-9),
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_bound_value_available() {
        let mut engine = ExpressionEngine::new();
        engine.bind("numChannels", &ObjectValue::Int(3));
        let eval = engine.eval_property("total", "numChannels * 2");
        assert_eq!(eval.value, Some(ObjectValue::Int(6)));
    }
}
