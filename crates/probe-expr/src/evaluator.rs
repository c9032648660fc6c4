//! `Evaluator` — the sandboxed expression & template engine.
//!
//! Wraps `jexl_eval::Evaluator` the way `boternity-core`'s `WorkflowEvaluator`
//! does, adding a hard per-evaluation timeout (process isolation is out of
//! scope — the timeout is all the sandboxing this engine does) and
//! `{{ ... }}` template interpolation on top.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use regex::{Captures, Regex, RegexBuilder};
use serde_json::Value;

use crate::builtins;
use crate::error::ExprError;
use crate::rewrite::rewrite_calls;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Evaluates expression strings and `{{…}}` templates against a JSON
/// context object.
#[derive(Debug, Clone)]
pub struct Evaluator {
    timeout: Duration,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Create an evaluator with the default 5s per-evaluation timeout.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create an evaluator with a custom per-evaluation timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Evaluate `expr` against `ctx`, returning the raw JSON result.
    pub fn eval(&self, expr: &str, ctx: &Value) -> Result<Value, ExprError> {
        if !ctx.is_object() {
            return Err(ExprError::InvalidContext);
        }

        let rewritten = rewrite_calls(expr);
        let ctx_owned = ctx.clone();
        let expr_for_err = expr.to_string();

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let evaluator = build_jexl_evaluator();
            let result = evaluator
                .eval_in_context(&rewritten, &ctx_owned)
                .map_err(|e| e.to_string());
            // The receiver may have given up after a timeout; ignore send errors.
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ExprError::Eval {
                expr: expr_for_err,
                message,
            }),
            Err(_) => Err(ExprError::Timeout(expr_for_err)),
        }
    }

    /// Evaluate `expr` and coerce the result to boolean using JS-like
    /// truthiness. Used for `skipif`.
    pub fn eval_bool(&self, expr: &str, ctx: &Value) -> Result<bool, ExprError> {
        let value = self.eval(expr, ctx)?;
        Ok(value_truthy(&value))
    }

    /// Evaluate `expr` and require the result to be a JSON boolean (no
    /// coercion). Used for `test`.
    pub fn eval_test(&self, expr: &str, ctx: &Value) -> Result<bool, ExprError> {
        let value = self.eval(expr, ctx)?;
        value.as_bool().ok_or_else(|| ExprError::NotBoolean {
            expr: expr.to_string(),
            got: value.to_string(),
        })
    }

    /// Evaluate every `{{ ... }}` segment in `input` and splice the
    /// stringified results back into the surrounding literal text.
    ///
    /// Input with no `{{` is returned unchanged.
    pub fn eval_template(&self, input: &str, ctx: &Value) -> Result<String, ExprError> {
        if !input.contains("{{") {
            return Ok(input.to_string());
        }

        let re = template_regex();
        let mut first_err = None;

        let replaced = re
            .replace_all(input, |caps: &Captures| {
                let inner = caps[1].trim();
                match self.eval(inner, ctx) {
                    Ok(value) => stringify(&value),
                    Err(e) => {
                        if first_err.is_none() {
                            first_err = Some(e);
                        }
                        String::new()
                    }
                }
            })
            .into_owned();

        match first_err {
            Some(e) => Err(e),
            None => Ok(replaced),
        }
    }

    /// Recursively template-evaluate every string leaf of a JSON value,
    /// preserving object/array structure.
    pub fn eval_template_map(&self, value: &Value, ctx: &Value) -> Result<Value, ExprError> {
        match value {
            Value::String(s) => Ok(Value::String(self.eval_template(s, ctx)?)),
            Value::Array(items) => items
                .iter()
                .map(|v| self.eval_template_map(v, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| self.eval_template_map(v, ctx).map(|v2| (k.clone(), v2)))
                .collect::<Result<serde_json::Map<_, _>, _>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }
}

fn template_regex() -> Regex {
    RegexBuilder::new(r"\{\{(.*?)\}\}")
        .dot_matches_new_line(true)
        .build()
        .expect("template regex is a fixed valid pattern")
}

/// JS-like truthiness coercion, following the same rules
/// `boternity-core`'s `WorkflowEvaluator::value_to_bool` uses.
fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn build_jexl_evaluator() -> jexl_eval::Evaluator<'static> {
    use serde_json::json;

    jexl_eval::Evaluator::new()
        .with_transform("match_json", |args: &[Value]| {
            let actual = args.first().cloned().unwrap_or(Value::Null);
            let expected = args.get(1).cloned().unwrap_or(Value::Null);
            Ok(json!(builtins::match_json(&actual, &expected)))
        })
        .with_transform("diff_json", |args: &[Value]| {
            let a = args.first().cloned().unwrap_or(Value::Null);
            let b = args.get(1).cloned().unwrap_or(Value::Null);
            Ok(json!(builtins::diff_json(&a, &b)))
        })
        .with_transform("random_int", |args: &[Value]| {
            let max = args
                .first()
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            Ok(json!(builtins::random_int(max)))
        })
        .with_transform("random_str", |args: &[Value]| {
            let len = args
                .first()
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            Ok(json!(builtins::random_str(len)))
        })
        .with_transform("unixtime", |_args: &[Value]| {
            Ok(json!(builtins::unixtime()))
        })
        .with_transform("contains", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("").to_string();
            let substr = args.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
            Ok(json!(builtins::contains(&s, &substr)))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Value {
        value
    }

    #[test]
    fn eval_arithmetic_and_comparison() {
        let e = Evaluator::new();
        let c = ctx(json!({}));
        assert_eq!(e.eval("1 + 2", &c).unwrap(), json!(3.0));
        assert!(e.eval_bool("2 > 1", &c).unwrap());
    }

    #[test]
    fn eval_property_access() {
        let e = Evaluator::new();
        let c = ctx(json!({"vars": {"name": "alice"}}));
        assert_eq!(e.eval("vars.name", &c).unwrap(), json!("alice"));
    }

    #[test]
    fn eval_index_access() {
        let e = Evaluator::new();
        let c = ctx(json!({"vars": {"items": [10, 20, 30]}}));
        assert_eq!(e.eval("vars.items[1]", &c).unwrap(), json!(20.0));
    }

    #[test]
    fn eval_ternary() {
        let e = Evaluator::new();
        let c = ctx(json!({"status": 0}));
        assert_eq!(
            e.eval("status == 0 ? 'ok' : 'fail'", &c).unwrap(),
            json!("ok")
        );
    }

    #[test]
    fn eval_test_requires_boolean() {
        let e = Evaluator::new();
        let c = ctx(json!({}));
        assert!(e.eval_test("1 + 1", &c).is_err());
        assert!(e.eval_test("1 == 1", &c).unwrap());
    }

    #[test]
    fn eval_bool_coerces_truthiness() {
        let e = Evaluator::new();
        let c = ctx(json!({"vars": {"name": ""}}));
        assert!(!e.eval_bool("vars.name", &c).unwrap());
    }

    #[test]
    fn eval_invalid_context_errors() {
        let e = Evaluator::new();
        let not_object = json!("oops");
        assert!(matches!(
            e.eval("1", &not_object),
            Err(ExprError::InvalidContext)
        ));
    }

    #[test]
    fn builtin_contains_call_syntax() {
        let e = Evaluator::new();
        let c = ctx(json!({"res": {"body": "hello world"}}));
        assert!(e
            .eval_bool("contains(res.body, 'world')", &c)
            .unwrap());
    }

    #[test]
    fn builtin_match_json_call_syntax() {
        let e = Evaluator::new();
        let c = ctx(json!({"res": {"body": {"a": 1, "b": 2}}}));
        assert!(e
            .eval_bool("match_json(res.body, {a: 1})", &c)
            .unwrap());
    }

    #[test]
    fn builtin_unixtime_call_syntax() {
        let e = Evaluator::new();
        let c = ctx(json!({}));
        let result = e.eval("unixtime()", &c).unwrap();
        assert!(result.as_i64().unwrap() > 1_700_000_000);
    }

    #[test]
    fn template_no_braces_returns_unchanged() {
        let e = Evaluator::new();
        let c = ctx(json!({}));
        assert_eq!(e.eval_template("plain text", &c).unwrap(), "plain text");
    }

    #[test]
    fn template_single_interpolation() {
        let e = Evaluator::new();
        let c = ctx(json!({"vars": {"name": "bob"}}));
        assert_eq!(
            e.eval_template("hello {{ vars.name }}!", &c).unwrap(),
            "hello bob!"
        );
    }

    #[test]
    fn template_multiple_interpolations() {
        let e = Evaluator::new();
        let c = ctx(json!({"vars": {"a": "x", "b": "y"}}));
        assert_eq!(
            e.eval_template("{{vars.a}}-{{vars.b}}", &c).unwrap(),
            "x-y"
        );
    }

    #[test]
    fn template_integral_number_has_no_trailing_zero() {
        let e = Evaluator::new();
        let c = ctx(json!({"vars": {"count": 5}}));
        assert_eq!(e.eval_template("{{ vars.count }}", &c).unwrap(), "5");
    }

    #[test]
    fn template_map_preserves_structure() {
        let e = Evaluator::new();
        let c = ctx(json!({"vars": {"token": "abc123"}}));
        let input = json!({
            "headers": {"authorization": "Bearer {{ vars.token }}"},
            "retries": 3,
            "tags": ["{{ vars.token }}", "static"],
        });
        let result = e.eval_template_map(&input, &c).unwrap();
        assert_eq!(
            result["headers"]["authorization"],
            json!("Bearer abc123")
        );
        assert_eq!(result["retries"], json!(3));
        assert_eq!(result["tags"][0], json!("abc123"));
        assert_eq!(result["tags"][1], json!("static"));
    }

    #[test]
    fn timeout_fires_for_slow_expression() {
        // There is no intentionally-slow expression in this language, so we
        // verify the mechanism directly with a near-zero timeout.
        let e = Evaluator::with_timeout(Duration::from_nanos(1));
        let c = ctx(json!({}));
        let result = e.eval("1 + 1", &c);
        // Either it raced ahead of the timeout or it didn't; what matters is
        // that a timeout never panics and always yields a typed error.
        if let Err(err) = result {
            assert!(matches!(err, ExprError::Timeout(_)));
        }
    }
}
