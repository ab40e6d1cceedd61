//! Condition evaluation against a request data map.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::domain::Condition;
use crate::engine::coerce::coerce_to_f64;
use crate::engine::substitute::lookup_path;

/// Evaluate an AND-list of conditions. An empty list evaluates true.
pub fn evaluate_all(conditions: &[Condition], data: &Map<String, Value>) -> bool {
    for condition in conditions {
        let met = evaluate(condition, data);
        debug!(
            field = %condition.field,
            operator = %condition.operator,
            met,
            "condition evaluated"
        );
        if !met {
            return false;
        }
    }
    true
}

/// Evaluate one condition. The field is resolved as a dotted path with the
/// same rules as variable substitution.
///
/// An absent field satisfies only `neq`. A present-but-null field compares
/// against null for `eq`/`neq` and fails every other operator. `eq`/`neq`
/// use deep structural equality without numeric coercion, so an integer `1`
/// does not equal a float `1.0`.
pub fn evaluate(condition: &Condition, data: &Map<String, Value>) -> bool {
    let Some(field_value) = lookup_path(data, &condition.field) else {
        return condition.operator == "neq";
    };

    if field_value.is_null() {
        return match condition.operator.as_str() {
            "eq" => condition.value.is_null(),
            "neq" => !condition.value.is_null(),
            _ => false,
        };
    }

    match condition.operator.as_str() {
        "eq" => field_value == &condition.value,
        "neq" => field_value != &condition.value,
        "contains" => match (field_value.as_str(), condition.value.as_str()) {
            (Some(haystack), Some(needle)) => haystack.contains(needle),
            _ => {
                warn!(field = %condition.field, "'contains' expects string field and value");
                false
            }
        },
        "in" => match condition.value.as_array() {
            Some(items) => items.iter().any(|item| item == field_value),
            None => {
                warn!(field = %condition.field, "'in' expects a list condition value");
                false
            }
        },
        op @ ("gt" | "lt" | "gte" | "lte") => {
            match (coerce_to_f64(field_value), coerce_to_f64(&condition.value)) {
                (Some(lhs), Some(rhs)) => match op {
                    "gt" => lhs > rhs,
                    "lt" => lhs < rhs,
                    "gte" => lhs >= rhs,
                    _ => lhs <= rhs,
                },
                _ => {
                    warn!(
                        field = %condition.field,
                        operator = %op,
                        "numeric comparison with non-numeric operand"
                    );
                    false
                }
            }
        }
        unknown => {
            warn!(operator = %unknown, "unknown condition operator");
            false
        }
    }
}
