//! The request dispatcher for dynamic endpoints.
//!
//! Installed as the router's fallback so it serves every path that is not a
//! management endpoint: it resolves the definition from the route table,
//! assembles the request data map, runs the conditional flow (or the
//! default verb logic), persists the final state when flagged and shapes
//! the HTTP response.

use std::collections::HashMap;
use std::time::Duration;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::adapters::AppState;
use crate::domain::{ApiDefinition, Parameter};
use crate::engine::coerce::canonical_string;
use crate::engine::{self, FlowEnv};

/// Mirrors the original gateway's request body cap.
const BODY_LIMIT: usize = 10 * 1024 * 1024;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().as_str().to_uppercase();
    let path = request.uri().path().to_string();

    // 1. Route lookup: exact key first, then registered :param templates.
    let Some((definition, path_params)) = state.routes.lookup(&method, &path).await else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("no API registered for {method} {path}"),
        );
    };
    info!(api = %definition.name, %method, %path, "matched dynamic route");

    // 2. Assemble the request data map: path params, then query params,
    // then body fields, earlier sources winning.
    let query = request.uri().query().map(str::to_owned);
    let body_fields = if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
        match to_bytes(request.into_body(), BODY_LIMIT).await {
            Ok(bytes) if !bytes.is_empty() => {
                match serde_json::from_slice::<Map<String, Value>>(&bytes) {
                    Ok(map) => Some(map),
                    Err(err) => {
                        warn!(api = %definition.name, %err, "cannot parse request body, body fields ignored");
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(err) => {
                warn!(api = %definition.name, %err, "cannot read request body, body fields ignored");
                None
            }
        }
    } else {
        None
    };
    let data = build_request_data(&path_params, query.as_deref(), body_fields);
    debug!(api = %definition.name, ?data, "request data assembled");

    // 3. Required parameters must be present with a usable value.
    if let Some(missing) = find_missing_required(&definition.parameters, &data) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Missing or empty required parameter: {missing}"),
        );
    }

    // 4. The definition must name a persistence target.
    if definition.database.is_empty() || definition.collection.is_empty() {
        error!(api = %definition.name, "definition is missing database or collection");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "API configuration error: missing target database or collection",
        );
    }

    let request_budget = Duration::from_secs(state.timeouts.request_secs);

    // 5. Run the flow, or the default verb logic when none is defined.
    let (response, final_data, save) = if definition.conditional_flow.is_some() {
        let env = FlowEnv {
            definitions: state.definitions.clone(),
            database: definition.database.clone(),
            collection: definition.collection.clone(),
            depth: 0,
        };
        let run = engine::process(definition.conditional_flow.as_ref(), data.clone(), &env);
        match timeout(request_budget, run).await {
            Err(_) => {
                error!(api = %definition.name, "flow evaluation timed out");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "request cancelled: processing deadline exceeded",
                );
            }
            Ok(Err(err)) => {
                error!(api = %definition.name, %err, "flow evaluation failed");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to process request logic: {err}"),
                );
            }
            Ok(Ok(outcome)) => (outcome.response, outcome.data, outcome.save),
        }
    } else {
        match default_verb_logic(&state, &definition, &method, data, request_budget).await {
            Ok(outcome) => outcome,
            Err(response) => return response,
        }
    };

    // 6. Persist when flagged; a persistence failure overwrites the
    // response so the client never mistakes the data for saved.
    if save {
        let save_budget = Duration::from_secs(state.timeouts.save_secs);
        let run = state.data.save(
            &definition.database,
            &definition.collection,
            definition.unique_key(),
            &final_data,
        );
        match timeout(save_budget, run).await {
            Err(_) => {
                error!(api = %definition.name, "post-processing save timed out");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "request cancelled: save deadline exceeded",
                );
            }
            Ok(Err(err)) => {
                error!(api = %definition.name, %err, "failed to persist request data");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to save data to database: {err}"),
                );
            }
            Ok(Ok(())) => {
                info!(api = %definition.name, "request data persisted");
            }
        }
    }

    // 7. Final shaping: Key/Value lists fold into maps, and the response
    // may carry its own status code.
    let response = shape_response(response);
    let status = extract_status_code(&response).unwrap_or(StatusCode::OK);
    (status, Json(response)).into_response()
}

/// Default behavior for definitions without a flow, keyed by verb.
async fn default_verb_logic(
    state: &AppState,
    definition: &ApiDefinition,
    method: &str,
    data: Map<String, Value>,
    budget: Duration,
) -> Result<(Value, Map<String, Value>, bool), Response> {
    match method {
        "GET" => {
            // The whole data map doubles as the query filter.
            let run = state
                .data
                .find(&definition.database, &definition.collection, &data);
            match timeout(budget, run).await {
                Err(_) => Err(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "request cancelled: query deadline exceeded",
                )),
                Ok(Err(err)) => {
                    error!(api = %definition.name, %err, "default GET query failed");
                    Err(error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to retrieve data: {err}"),
                    ))
                }
                Ok(Ok(results)) => Ok((Value::Array(results), data, false)),
            }
        }
        "POST" | "PUT" => Ok((Value::Object(data.clone()), data, true)),
        "DELETE" => {
            if data.is_empty() {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "DELETE requires parameters to identify data to delete",
                ));
            }
            let run = state
                .data
                .delete(&definition.database, &definition.collection, &data);
            match timeout(budget, run).await {
                Err(_) => Err(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "request cancelled: delete deadline exceeded",
                )),
                Ok(Err(err)) => {
                    error!(api = %definition.name, %err, "default DELETE failed");
                    Err(error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to delete data: {err}"),
                    ))
                }
                Ok(Ok(count)) => Ok((
                    json!({"success": true, "deletedCount": count}),
                    data,
                    false,
                )),
            }
        }
        other => Ok((
            json!({"success": true, "message": format!("Method {other} received")}),
            data,
            false,
        )),
    }
}

/// Merge path parameters, query parameters and body fields into one map.
/// Precedence is path > query > body: a key set by an earlier source is
/// never overwritten by a later one.
pub(crate) fn build_request_data(
    path_params: &HashMap<String, String>,
    query: Option<&str>,
    body: Option<Map<String, Value>>,
) -> Map<String, Value> {
    let mut data = Map::new();

    for (key, value) in path_params {
        data.insert(key.clone(), Value::String(value.clone()));
    }

    if let Some(query) = query {
        for (key, value) in parse_query_pairs(query) {
            data.entry(key).or_insert(Value::String(value));
        }
    }

    if let Some(body) = body {
        for (key, value) in body {
            data.entry(key).or_insert(value);
        }
    }

    data
}

fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn decode_component(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|s| s.into_owned())
        .unwrap_or(plus_decoded)
}

/// A required parameter must be present, non-null and not an empty string.
pub(crate) fn find_missing_required<'a>(
    parameters: &'a [Parameter],
    data: &Map<String, Value>,
) -> Option<&'a str> {
    parameters
        .iter()
        .filter(|p| p.required)
        .find(|p| match data.get(&p.name) {
            None | Some(Value::Null) => true,
            Some(value) => canonical_string(value).is_empty(),
        })
        .map(|p| p.name.as_str())
}

/// Normalise the outgoing payload: a null response becomes a bare success
/// marker, and Key/Value pair lists fold into objects.
pub(crate) fn shape_response(response: Value) -> Value {
    match response {
        Value::Null => json!({"success": true}),
        other => engine::fold_key_value_pairs(&other),
    }
}

/// Honour a `statusCode` carried by the response itself, either at the top
/// level or nested under `opdResult`.
pub(crate) fn extract_status_code(response: &Value) -> Option<StatusCode> {
    let map = response.as_object()?;
    let code = map
        .get("statusCode")
        .or_else(|| map.get("opdResult")?.as_object()?.get("statusCode"))?;
    let code = code.as_u64().or_else(|| code.as_f64().map(|f| f as u64))?;
    StatusCode::from_u16(u16::try_from(code).ok()?).ok()
}
