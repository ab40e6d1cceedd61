//! The conditional flow interpreter.
//!
//! A flow is a tree of [`ConditionalBlock`]s. Each request evaluates the
//! tree against its own data map: conditions select the `then` or `else`
//! action, the action's transformations rewrite a copy of the map, and the
//! action body produces the response, the final data state and the save
//! flag. `apiCall` actions chain into other registered definitions by name,
//! resolved through the definition store rather than the route table so
//! that unrouted or path-parameterised targets stay callable.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Action, ConditionalBlock};
use crate::engine::{condition, substitute, transform};
use crate::persistence::{DefinitionRepository, StoreError};

/// Upper bound on chained `apiCall` recursion. Definitions are authored
/// data, so a cycle (A calls B calls A) is reachable at runtime and must
/// fail with an error instead of exhausting the stack.
const MAX_CALL_DEPTH: u8 = 16;

/// Errors that abort flow evaluation. Recoverable problems (unknown
/// operators, missing references, malformed formulas) never reach this
/// type; they degrade to warnings and defaults.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("api call chain exceeded maximum depth of {MAX_CALL_DEPTH} at '{0}'")]
    CallDepthExceeded(String),

    #[error("failed to resolve api call target '{name}': {source}")]
    CallTargetUnavailable {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("api call to '{name}' failed: {source}")]
    CallFailed {
        name: String,
        #[source]
        source: Box<FlowError>,
    },
}

/// Evaluation environment: the definition store handle for cross-endpoint
/// calls plus the current target database/collection, which nested calls
/// replace with their own target's.
#[derive(Clone)]
pub struct FlowEnv {
    pub definitions: Arc<dyn DefinitionRepository>,
    pub database: String,
    pub collection: String,
    pub depth: u8,
}

impl FlowEnv {
    fn nested(&self, database: String, collection: String) -> Self {
        Self {
            definitions: self.definitions.clone(),
            database,
            collection,
            depth: self.depth + 1,
        }
    }
}

/// Result of one flow evaluation.
#[derive(Debug)]
pub struct FlowOutcome {
    /// Value to send back to the client.
    pub response: Value,
    /// Final data state after all transformations, used for persistence.
    pub data: Map<String, Value>,
    /// Whether the dispatcher should persist `data`.
    pub save: bool,
}

impl FlowOutcome {
    /// Pass-through outcome: the data map is both response and final state,
    /// nothing is saved.
    fn passthrough(data: Map<String, Value>) -> Self {
        Self {
            response: Value::Object(data.clone()),
            data,
            save: false,
        }
    }
}

/// Walk one conditional block: evaluate its conditions, pick the `then` or
/// `else` action and execute it. A missing block or missing action passes
/// the data through unchanged.
pub fn process<'a>(
    flow: Option<&'a ConditionalBlock>,
    data: Map<String, Value>,
    env: &'a FlowEnv,
) -> BoxFuture<'a, Result<FlowOutcome, FlowError>> {
    Box::pin(async move {
        let Some(block) = flow else {
            return Ok(FlowOutcome::passthrough(data));
        };

        let conditions_met = condition::evaluate_all(&block.conditions, &data);
        debug!(conditions_met, "conditional block evaluated");

        let action = if conditions_met {
            block.then.as_deref()
        } else {
            block.otherwise.as_deref()
        };

        match action {
            Some(action) => process_action(action, data, env).await,
            None => Ok(FlowOutcome::passthrough(data)),
        }
    })
}

/// Apply an action's transformations and execute its body.
async fn process_action(
    action: &Action,
    data: Map<String, Value>,
    env: &FlowEnv,
) -> Result<FlowOutcome, FlowError> {
    let transformed = transform::apply(&action.transform, &data);
    debug!(kind = %action.kind, save = action.save_data, "processing action");

    match action.kind.as_str() {
        "return" => {
            let template = action.return_data.clone().unwrap_or(Value::Null);
            let template = fold_key_value_pairs(&template);
            let response = substitute::substitute(&template, &transformed);
            Ok(FlowOutcome {
                response,
                data: transformed,
                save: action.save_data,
            })
        }
        "continue" => Ok(FlowOutcome {
            response: Value::Object(transformed.clone()),
            data: transformed,
            save: action.save_data,
        }),
        "conditionalBlock" => match &action.conditional_flow {
            Some(nested) => process(Some(nested), transformed, env).await,
            None => {
                warn!("action type is 'conditionalBlock' but no nested flow is defined");
                Ok(FlowOutcome {
                    response: Value::Object(transformed.clone()),
                    data: transformed,
                    save: action.save_data,
                })
            }
        },
        "apiCall" => process_api_call(action, transformed, env).await,
        unknown => Err(FlowError::UnknownActionType(unknown.to_string())),
    }
}

/// Execute a cross-endpoint call, store its normalised response in the data
/// map and re-apply the action's transformations so formulas can reference
/// the stored result.
async fn process_api_call(
    action: &Action,
    mut transformed: Map<String, Value>,
    env: &FlowEnv,
) -> Result<FlowOutcome, FlowError> {
    let Some(call) = &action.api_call else {
        warn!("action type is 'apiCall' but no call configuration is defined");
        return Ok(FlowOutcome {
            response: json!({"status": "error", "message": "Invalid API call configuration"}),
            data: transformed,
            save: false,
        });
    };

    if env.depth >= MAX_CALL_DEPTH {
        return Err(FlowError::CallDepthExceeded(call.api_name.clone()));
    }

    let target = env
        .definitions
        .get_by_name(&call.api_name)
        .await
        .map_err(|source| FlowError::CallTargetUnavailable {
            name: call.api_name.clone(),
            source,
        })?;

    // Resolve the call parameters; a reference that resolves to null (or a
    // literal null) means a required input is missing, which is reported as
    // a structured response rather than an error.
    let mut call_params = Map::new();
    for (key, template) in &call.parameters {
        let resolved = resolve_parameter(template, &transformed);
        if resolved.is_null() {
            warn!(parameter = %key, api = %call.api_name, "required call parameter is missing");
            return Ok(FlowOutcome {
                response: json!({
                    "status": "error",
                    "message": format!("Missing required parameter: {key}"),
                }),
                data: transformed,
                save: false,
            });
        }
        call_params.insert(key.clone(), resolved);
    }

    let nested_env = env.nested(target.database.clone(), target.collection.clone());
    let nested = process(target.conditional_flow.as_ref(), call_params, &nested_env)
        .await
        .map_err(|source| FlowError::CallFailed {
            name: call.api_name.clone(),
            source: Box::new(source),
        })?;

    let response = unwrap_data_envelope(nested.response);

    if set_value_at_path(&mut transformed, &call.result_field, response).is_err() {
        warn!(field = %call.result_field, "cannot store api call result: intermediate is not a map");
        return Ok(FlowOutcome {
            response: json!({"status": "error", "message": "Invalid result field path"}),
            data: transformed,
            save: false,
        });
    }

    // Second pass over the transformations now that the call result is in
    // place; idempotent for set/remove with stable inputs.
    let reapplied = transform::apply(&action.transform, &transformed);

    if let Some(template @ Value::Object(_)) = &action.return_data {
        if let Value::Object(projected) = substitute::substitute(template, &reapplied) {
            return Ok(FlowOutcome {
                response: Value::Object(projected.clone()),
                data: projected,
                save: action.save_data,
            });
        }
    }

    Ok(FlowOutcome {
        response: Value::Object(reapplied.clone()),
        data: reapplied,
        save: action.save_data,
    })
}

fn resolve_parameter(template: &Value, data: &Map<String, Value>) -> Value {
    if let Value::String(s) = template {
        if let Some(path) = s.strip_prefix('$') {
            return substitute::lookup_path(data, path)
                .cloned()
                .unwrap_or(Value::Null);
        }
    }
    template.clone()
}

/// Nested call responses that arrive wrapped as `{.., "data": ...}` are
/// unwrapped to the payload itself.
fn unwrap_data_envelope(response: Value) -> Value {
    match response {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Write `value` at a dotted path, creating intermediate objects as needed.
/// Fails when an existing intermediate is not an object.
fn set_value_at_path(
    data: &mut Map<String, Value>,
    path: &str,
    value: Value,
) -> Result<(), ()> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, intermediates) = segments.split_last().ok_or(())?;

    let mut current = data;
    for segment in intermediates {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match slot {
            Value::Object(inner) => current = inner,
            _ => return Err(()),
        }
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Fold a list of `{Key, Value}` pairs (case-insensitive member names) into
/// a single object. Lists in any other shape pass through unchanged.
pub fn fold_key_value_pairs(template: &Value) -> Value {
    let Value::Array(items) = template else {
        return template.clone();
    };
    if items.is_empty() {
        return template.clone();
    }

    let mut folded = Map::new();
    for item in items {
        let Some(pair) = item.as_object() else {
            return template.clone();
        };
        let key = pair.get("Key").or_else(|| pair.get("key"));
        let value = pair.get("Value").or_else(|| pair.get("value"));
        match (key, value) {
            (Some(Value::String(key)), Some(value)) if !key.is_empty() => {
                folded.insert(key.clone(), value.clone());
            }
            _ => return template.clone(),
        }
    }
    Value::Object(folded)
}
