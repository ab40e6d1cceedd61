//! Variable substitution over request data maps.
//!
//! Templates may reference fields of the current data map with `$`-prefixed
//! dotted paths (`$user.profile.id`). Substitution is pure: it never mutates
//! the data map and only reads from it.

use serde_json::{Map, Value};
use tracing::warn;

/// Resolve a dotted path against a data map.
///
/// Returns `None` when any segment is missing or a non-object is reached
/// before the final segment. A present-but-null field resolves to
/// `Some(&Value::Null)`, which callers distinguish from absence.
pub fn lookup_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = data.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Recursively substitute `$path` references in a template.
///
/// Strings starting with `$` resolve against `data`; an unresolvable
/// reference yields null rather than the literal string. Objects and arrays
/// are rebuilt with substituted values (keys unchanged); every other value
/// passes through as-is.
pub fn substitute(template: &Value, data: &Map<String, Value>) -> Value {
    match template {
        Value::String(s) => match s.strip_prefix('$') {
            Some(path) => match lookup_path(data, path) {
                Some(value) => value.clone(),
                None => {
                    warn!(reference = %s, "variable reference not found in data map");
                    Value::Null
                }
            },
            None => template.clone(),
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, data)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| substitute(item, data)).collect())
        }
        other => other.clone(),
    }
}
