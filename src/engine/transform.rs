//! Transformation engine: ordered rewrites of a request data map.
//!
//! `apply` never mutates its input; it works on a shallow copy so that every
//! flow step owns its own state. Malformed transformations degrade to logged
//! warnings, never errors: a formula that cannot be evaluated simply leaves
//! its target field untouched.

use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::domain::Transformation;
use crate::engine::coerce::{canonical_string, coerce_to_f64};
use crate::engine::substitute::{lookup_path, substitute};

/// Apply transformations in order to a copy of `data` and return the result.
/// Later transformations observe the writes of earlier ones.
pub fn apply(transforms: &[Transformation], data: &Map<String, Value>) -> Map<String, Value> {
    let mut result = data.clone();
    if transforms.is_empty() {
        return result;
    }

    for t in transforms {
        match t.operation.as_str() {
            "set" => {
                let value = substitute(&t.value, &result);
                // A $path that resolves to null leaves the field alone;
                // everything else (including literal null) is written.
                let unresolved_reference = value.is_null()
                    && matches!(&t.value, Value::String(s) if s.starts_with('$'));
                if unresolved_reference {
                    warn!(field = %t.field, value = %t.value, "set skipped: reference resolved to null");
                } else {
                    result.insert(t.field.clone(), value);
                }
            }
            "remove" => {
                result.remove(&t.field);
            }
            "append" => {
                let addition = substitute(&t.value, &result);
                match result.get(&t.field) {
                    None | Some(Value::Null) => {
                        result.insert(t.field.clone(), addition);
                    }
                    Some(current) => {
                        let joined =
                            format!("{}{}", canonical_string(current), canonical_string(&addition));
                        result.insert(t.field.clone(), Value::String(joined));
                    }
                }
            }
            "calculate" => {
                if t.field.is_empty() || t.formula.is_empty() {
                    warn!("calculate requires both 'field' and 'formula', skipping");
                    continue;
                }
                match evaluate_formula(&t.formula, &result) {
                    Some(outcome) => match Number::from_f64(outcome) {
                        Some(n) => {
                            result.insert(t.field.clone(), Value::Number(n));
                        }
                        None => {
                            warn!(field = %t.field, formula = %t.formula, "calculation produced a non-finite result, field not updated");
                        }
                    },
                    None => {
                        warn!(field = %t.field, formula = %t.formula, "calculation not possible, field not updated");
                    }
                }
            }
            other => {
                warn!(operation = %other, "unknown transformation operation, skipping");
            }
        }
    }

    result
}

/// Evaluate a `calculate` formula of the form `<op>:<arg>(,<arg>)*` against
/// the current data state. Returns `None` when the operation as a whole is
/// not possible (unknown sub-op, malformed formula, missing mandatory
/// operands); individual bad arguments are skipped where the sub-op allows.
fn evaluate_formula(formula: &str, data: &Map<String, Value>) -> Option<f64> {
    let Some((op, rest)) = formula.split_once(':') else {
        warn!(formula = %formula, "invalid formula, expected 'operation:arg1,arg2,...'");
        return None;
    };
    let args: Vec<&str> = rest.split(',').map(str::trim).collect();

    match op.trim().to_ascii_lowercase().as_str() {
        "add" | "sum" => {
            let mut total = 0.0;
            for arg in args {
                if arg.is_empty() {
                    continue;
                }
                let (negated, operand) = match arg.strip_prefix('-') {
                    Some(stripped) => (true, stripped),
                    None => (false, arg),
                };
                match resolve_operand(operand, data) {
                    Some(n) if negated => total -= n,
                    Some(n) => total += n,
                    None => {
                        warn!(argument = %arg, formula = %formula, "skipping non-numeric argument");
                    }
                }
            }
            Some(total)
        }
        "multiply" | "product" => {
            let mut product = 1.0;
            let mut has_operand = false;
            for arg in args {
                if arg.is_empty() {
                    continue;
                }
                match resolve_operand(arg, data) {
                    Some(n) => {
                        product *= n;
                        has_operand = true;
                    }
                    None => {
                        warn!(argument = %arg, formula = %formula, "skipping non-numeric argument");
                    }
                }
            }
            Some(if has_operand { product } else { 0.0 })
        }
        "subtract" => {
            if args.len() < 2 {
                warn!(formula = %formula, "subtract requires a minuend and at least one subtrahend");
                return None;
            }
            let mut total = resolve_operand(args[0], data)?;
            for arg in &args[1..] {
                match resolve_operand(arg, data) {
                    Some(n) => total -= n,
                    None => {
                        warn!(argument = %arg, formula = %formula, "skipping non-numeric subtrahend");
                    }
                }
            }
            Some(total)
        }
        "divide" => {
            if args.len() != 2 {
                warn!(formula = %formula, "divide requires exactly two arguments");
                return None;
            }
            let dividend = resolve_operand(args[0], data)?;
            let divisor = resolve_operand(args[1], data)?;
            if divisor == 0.0 {
                warn!(formula = %formula, "division by zero, result set to 0");
                Some(0.0)
            } else {
                Some(dividend / divisor)
            }
        }
        unknown => {
            warn!(operation = %unknown, formula = %formula, "unknown calculation operation");
            None
        }
    }
}

/// A formula argument is either a `$path` reference into the data map or a
/// numeric literal.
fn resolve_operand(arg: &str, data: &Map<String, Value>) -> Option<f64> {
    match arg.strip_prefix('$') {
        Some(path) => coerce_to_f64(lookup_path(data, path)?),
        None => arg.parse::<f64>().ok(),
    }
}
