//! Scalar coercion helpers shared by the condition evaluator and the
//! `calculate` transformation.

use serde_json::Value;

/// Coerce a JSON scalar to `f64`.
///
/// Numbers convert directly, booleans map to `1.0`/`0.0`, and strings are
/// accepted when they parse as a decimal number. Null, arrays and objects
/// never coerce.
pub fn coerce_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Canonical string form of a value, used for `append` concatenation and
/// for deciding whether an upsert key is effectively empty. Null renders as
/// the empty string; composites render as compact JSON.
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        composite => composite.to_string(),
    }
}
