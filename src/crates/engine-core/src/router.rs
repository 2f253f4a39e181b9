//! The router — maps an (element, output port) pair to the ordered set of
//! enabled downstream elements, and evaluates per-connection conditions.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::model::{Connection, Element, ThreadDefinition};

/// Collaborator contract for evaluating expressions. The engine never
/// implements a sandboxed scripting backend itself — it calls through this
/// trait, which a real deployment backs with the expression-evaluator
/// service. `evaluate_boolean` treats an evaluator error as `false` (logged)
/// per the router's error policy, and coerces non-boolean results via
/// standard truthy parsing.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` against `vars`, returning the raw result value.
    fn evaluate(&self, expression: &str, vars: &HashMap<String, Value>) -> Result<Value, String>;

    /// Evaluate `expression` as a boolean. Empty/whitespace-only expressions
    /// are true. Evaluator errors and unparsable results are false.
    fn evaluate_boolean(&self, expression: &str, vars: &HashMap<String, Value>) -> bool {
        if expression.trim().is_empty() {
            return true;
        }
        match self.evaluate(expression, vars) {
            Ok(value) => truthy(&value),
            Err(e) => {
                warn!(expression, error = %e, "condition expression evaluation failed, treating as false");
                false
            }
        }
    }
}

/// Standard truthy coercion for a non-boolean evaluator result.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"),
        Value::Null => false,
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// A minimal comparison-only expression evaluator, sufficient to exercise
/// the router's contract in tests and the demo CLI. Supports
/// `<ident> <op> <literal>` where `<op>` is one of `==`, `!=`, `>`, `>=`,
/// `<`, `<=`, with numeric or string literals, plus bare identifiers treated
/// as a direct variable lookup. This is deliberately not a sandboxed
/// scripting backend — it exists so the router is exercisable without a
/// production evaluator.
#[derive(Default)]
pub struct ComparisonEvaluator;

impl ExpressionEvaluator for ComparisonEvaluator {
    fn evaluate(&self, expression: &str, vars: &HashMap<String, Value>) -> Result<Value, String> {
        let expr = expression.trim();
        for op in ["==", "!=", ">=", "<=", ">", "<"] {
            if let Some(idx) = expr.find(op) {
                let lhs = expr[..idx].trim();
                let rhs = expr[idx + op.len()..].trim();
                let lhs_val = resolve(lhs, vars)?;
                let rhs_val = resolve(rhs, vars)?;
                return Ok(Value::Bool(compare(&lhs_val, &rhs_val, op)?));
            }
        }
        resolve(expr, vars)
    }
}

fn resolve(token: &str, vars: &HashMap<String, Value>) -> Result<Value, String> {
    if let Ok(n) = token.parse::<f64>() {
        return Ok(Value::from(n));
    }
    if let Some(stripped) = token
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    {
        return Ok(Value::String(stripped.to_string()));
    }
    match token {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    vars.get(token)
        .cloned()
        .ok_or_else(|| format!("unresolved identifier '{token}'"))
}

fn compare(lhs: &Value, rhs: &Value, op: &str) -> Result<bool, String> {
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return Ok(match op {
            "==" => a == b,
            "!=" => a != b,
            ">" => a > b,
            ">=" => a >= b,
            "<" => a < b,
            "<=" => a <= b,
            _ => unreachable!(),
        });
    }
    match op {
        "==" => Ok(lhs == rhs),
        "!=" => Ok(lhs != rhs),
        _ => Err(format!("cannot order-compare non-numeric values with '{op}'")),
    }
}

/// Resolves downstream elements for an (element, output port) pair.
pub struct Router<'a> {
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> Router<'a> {
    pub fn new(evaluator: &'a dyn ExpressionEvaluator) -> Self {
        Self { evaluator }
    }

    /// The ordered list of enabled target elements reachable from `source`'s
    /// `port`, in the order connections appear in the definition. Disabled
    /// targets are excluded; a port with no connections yields an empty
    /// vector (a terminal branch).
    pub fn downstream_for_port<'d>(
        &self,
        source: &Element,
        port: &str,
        thread_def: &'d ThreadDefinition,
        vars: &HashMap<String, Value>,
    ) -> Vec<&'d Element> {
        thread_def
            .connections
            .iter()
            .filter(|c| c.source_element_id == source.id && c.source_port == port)
            .filter_map(|c| self.resolve_target(c, thread_def, vars))
            .collect()
    }

    fn resolve_target<'d>(
        &self,
        connection: &Connection,
        thread_def: &'d ThreadDefinition,
        vars: &HashMap<String, Value>,
    ) -> Option<&'d Element> {
        let target = thread_def.element_by_id(connection.target_element_id)?;
        if target.disabled {
            return None;
        }
        if let Some(expr) = &connection.condition {
            if !self.evaluator.evaluate_boolean(expr, vars) {
                return None;
            }
        }
        Some(target)
    }
}
