//! Restricted guard/script expression grammar (spec.md §4.7, §9).
//!
//! Deliberately not a general expression evaluator: an expression is
//! exactly `<path> <op> <literal>`, one comparison, no boolean connectives,
//! no arithmetic, no function calls. `path` is dotted-key resolution into
//! the step's context bag; `literal` is a bool, `null`, a quoted string, or
//! a number. Anything that fails to parse evaluates to `false` rather than
//! erroring the step — a guard is a filter, not a computation that can
//! itself fail.

use serde_json::Value;

const OPERATORS: &[&str] = &["===", "!==", "==", "!=", ">=", "<=", ">", "<"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Bool(bool),
    Null,
    String(String),
    Number(f64),
}

/// A parsed `<path> <op> <literal>` expression.
#[derive(Debug, Clone)]
pub struct Guard {
    path: Vec<String>,
    op: Op,
    literal: Literal,
}

impl Guard {
    /// Parses `expr`. Returns `None` on any malformed input — callers
    /// treat that as "guard is false", never as an error to propagate.
    pub fn parse(expr: &str) -> Option<Self> {
        let trimmed = expr.trim();
        let path_end = trimmed.find(char::is_whitespace)?;
        let path_str = &trimmed[..path_end];
        if path_str.is_empty() {
            return None;
        }
        let rest = trimmed[path_end..].trim_start();

        let op_str = OPERATORS.iter().find(|op| rest.starts_with(**op))?;
        let op = match *op_str {
            "==" | "===" => Op::Eq,
            "!=" | "!==" => Op::NotEq,
            ">" => Op::Gt,
            ">=" => Op::Gte,
            "<" => Op::Lt,
            "<=" => Op::Lte,
            _ => return None,
        };

        let literal_str = rest[op_str.len()..].trim();
        let literal = parse_literal(literal_str)?;
        let path = path_str.split('.').map(String::from).collect();

        Some(Self { path, op, literal })
    }

    /// Evaluates against `context`, a JSON object assembled by the caller.
    pub fn evaluate(&self, context: &Value) -> bool {
        let actual = resolve_path(context, &self.path);
        match self.op {
            Op::Eq => match actual {
                Some(value) => values_equal(value, &self.literal),
                None => matches!(self.literal, Literal::Null),
            },
            Op::NotEq => match actual {
                Some(value) => !values_equal(value, &self.literal),
                None => !matches!(self.literal, Literal::Null),
            },
            Op::Gt | Op::Gte | Op::Lt | Op::Lte => {
                let (Some(actual), Literal::Number(expected)) = (actual, &self.literal) else {
                    return false;
                };
                let Some(actual) = actual.as_f64() else {
                    return false;
                };
                match self.op {
                    Op::Gt => actual > *expected,
                    Op::Gte => actual >= *expected,
                    Op::Lt => actual < *expected,
                    Op::Lte => actual <= *expected,
                    Op::Eq | Op::NotEq => unreachable!(),
                }
            }
        }
    }
}

fn parse_literal(s: &str) -> Option<Literal> {
    match s {
        "true" => Some(Literal::Bool(true)),
        "false" => Some(Literal::Bool(false)),
        "null" => Some(Literal::Null),
        _ if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') => {
            Some(Literal::String(s[1..s.len() - 1].to_string()))
        }
        _ => s.parse::<f64>().ok().map(Literal::Number),
    }
}

fn literal_to_value(literal: Literal) -> Value {
    match literal {
        Literal::Bool(b) => Value::Bool(b),
        Literal::Null => Value::Null,
        Literal::String(s) => Value::String(s),
        Literal::Number(n) => serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
    }
}

fn values_equal(value: &Value, literal: &Literal) -> bool {
    match literal {
        Literal::Bool(b) => value.as_bool() == Some(*b),
        Literal::Null => value.is_null(),
        Literal::String(s) => value.as_str() == Some(s.as_str()),
        Literal::Number(n) => value.as_f64() == Some(*n),
    }
}

/// Resolves a dotted path into a JSON value tree. No array indices, no
/// wildcards — plain nested-object key lookup only.
pub fn resolve_path<'a>(context: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = context;
    for key in path {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

/// Resolves a dotted path given as a single `"a.b.c"` string.
pub fn resolve_dotted<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let parts: Vec<String> = path.split('.').map(String::from).collect();
    resolve_path(context, &parts)
}

/// Evaluates a guard/script expression string directly, treating any
/// parse failure as `false` (spec.md §4.7: "a guard that fails to parse
/// is treated as false").
pub fn evaluate_guard(expr: &str, context: &Value) -> bool {
    Guard::parse(expr).is_some_and(|g| g.evaluate(context))
}

/// Evaluates a `script` step's expression, which may be a `<path> <op>
/// <literal>` comparison (same grammar as a guard, yielding a boolean), a
/// bare literal, or a bare dotted path resolved against `context` — still
/// no general expression evaluation, just which of the three shapes the
/// restricted grammar matches (spec.md §4.7). Returns `None` if `expr`
/// matches none of them.
pub fn evaluate_script(expr: &str, context: &Value) -> Option<Value> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(guard) = Guard::parse(trimmed) {
        return Some(Value::Bool(guard.evaluate(context)));
    }
    if let Some(literal) = parse_literal(trimmed) {
        return Some(literal_to_value(literal));
    }
    let is_bare_path = trimmed.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if is_bare_path {
        return resolve_dotted(context, trimmed).cloned();
    }
    None
}

/// Renders a JSON scalar the way `{{path}}` template substitution needs:
/// strings unquoted, everything else via its natural textual form.
pub fn value_to_template_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Substitutes every `{{dotted.path}}` occurrence in `template` with the
/// resolved value from `context`; unresolved paths substitute empty string.
pub fn resolve_template(template: &str, context: &Value) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let Some(start) = rest.find("{{") else {
            result.push_str(rest);
            break;
        };
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            result.push_str(&rest[start..]);
            break;
        };
        let path = after[..end].trim();
        if let Some(value) = resolve_dotted(context, path) {
            result.push_str(&value_to_template_string(value));
        }
        rest = &after[end + 2..];
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_against_string() {
        let ctx = json!({"status": "ready"});
        assert!(evaluate_guard(r#"status == "ready""#, &ctx));
        assert!(!evaluate_guard(r#"status == "busy""#, &ctx));
    }

    #[test]
    fn strict_operators_behave_like_plain_ones() {
        let ctx = json!({"count": 3});
        assert!(evaluate_guard("count === 3", &ctx));
        assert!(evaluate_guard("count !== 4", &ctx));
    }

    #[test]
    fn numeric_comparisons() {
        let ctx = json!({"score": 7.5});
        assert!(evaluate_guard("score > 7", &ctx));
        assert!(evaluate_guard("score >= 7.5", &ctx));
        assert!(!evaluate_guard("score < 7", &ctx));
    }

    #[test]
    fn dotted_path_resolution() {
        let ctx = json!({"steps": {"review": {"output": {"approved": true}}}});
        assert!(evaluate_guard("steps.review.output.approved == true", &ctx));
    }

    #[test]
    fn missing_path_against_null_literal() {
        let ctx = json!({});
        assert!(evaluate_guard("missing.field == null", &ctx));
        assert!(!evaluate_guard("missing.field != null", &ctx));
    }

    #[test]
    fn malformed_expression_is_false_not_an_error() {
        let ctx = json!({"a": 1});
        assert!(!evaluate_guard("a", &ctx));
        assert!(!evaluate_guard("a ?? 1", &ctx));
        assert!(!evaluate_guard("", &ctx));
    }

    #[test]
    fn script_comparison_yields_boolean() {
        let ctx = json!({"count": 3});
        assert_eq!(evaluate_script("count == 3", &ctx), Some(Value::Bool(true)));
    }

    #[test]
    fn script_bare_path_resolves_to_its_value() {
        let ctx = json!({"steps": {"compute": {"output": {"result": 1}}}});
        assert_eq!(evaluate_script("steps.compute.output.result", &ctx), Some(json!(1)));
    }

    #[test]
    fn script_bare_literal_resolves_to_itself() {
        let ctx = json!({});
        assert_eq!(evaluate_script("42", &ctx), Some(json!(42.0)));
        assert_eq!(evaluate_script(r#""hello""#, &ctx), Some(json!("hello")));
    }

    #[test]
    fn script_unresolvable_path_is_none() {
        let ctx = json!({});
        assert_eq!(evaluate_script("missing.path", &ctx), None);
    }

    #[test]
    fn template_substitution() {
        let ctx = json!({"inputs": {"name": "alice"}});
        assert_eq!(resolve_template("hello {{inputs.name}}!", &ctx), "hello alice!");
        assert_eq!(resolve_template("no templates here", &ctx), "no templates here");
        assert_eq!(resolve_template("missing {{inputs.missing}}", &ctx), "missing ");
    }
}
