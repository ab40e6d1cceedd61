//! CRUD endpoints for API definitions under `/api-generator`.
//!
//! Every mutation persists through the definition store first and updates
//! the route table afterwards, so the table is a lossy read cache with
//! monotonic visibility: once a handler returns, subsequent lookups see the
//! new state.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tokio::time::timeout;
use tracing::{error, info};

use crate::adapters::AppState;
use crate::domain::ApiDefinition;
use crate::persistence::StoreError;

fn crud_budget(state: &AppState) -> Duration {
    Duration::from_secs(state.timeouts.definition_crud_secs)
}

fn store_error_response(err: StoreError) -> Response {
    (err.status_code(), Json(json!({"error": err.to_string()}))).into_response()
}

fn timeout_response(operation: &str) -> Response {
    error!(operation, "definition store operation timed out");
    let err = StoreError::Cancelled(format!("{operation} deadline exceeded"));
    store_error_response(err)
}

/// POST /api-generator/create
pub async fn create_definition(
    State(state): State<AppState>,
    Json(payload): Json<ApiDefinition>,
) -> Response {
    let stored = match timeout(crud_budget(&state), state.definitions.create(payload)).await {
        Err(_) => return timeout_response("create"),
        Ok(Err(err)) => return store_error_response(err),
        Ok(Ok(stored)) => stored,
    };

    state.routes.insert(&stored).await;
    info!(name = %stored.name, key = %stored.route_key(), "API registered");

    (
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "code": StatusCode::CREATED.as_u16(),
            "message": "API created successfully",
            "data": stored,
        })),
    )
        .into_response()
}

/// GET /api-generator/list
pub async fn list_definitions(State(state): State<AppState>) -> Response {
    match timeout(crud_budget(&state), state.definitions.list()).await {
        Err(_) => timeout_response("list"),
        Ok(Err(err)) => store_error_response(err),
        Ok(Ok(definitions)) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "code": StatusCode::OK.as_u16(),
                "data": definitions,
            })),
        )
            .into_response(),
    }
}

/// GET /api-generator/detail/:name
pub async fn get_definition(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match timeout(crud_budget(&state), state.definitions.get_by_name(&name)).await {
        Err(_) => timeout_response("detail"),
        Ok(Err(err)) => store_error_response(err),
        Ok(Ok(definition)) => (StatusCode::OK, Json(definition)).into_response(),
    }
}

/// PUT /api-generator/update/:name
pub async fn update_definition(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<ApiDefinition>,
) -> Response {
    let budget = crud_budget(&state);

    // Capture the existing routing key before the store mutates anything.
    let existing = match timeout(budget, state.definitions.get_by_name(&name)).await {
        Err(_) => return timeout_response("update"),
        Ok(Err(err)) => return store_error_response(err),
        Ok(Ok(existing)) => existing,
    };
    let old_key = existing.route_key();

    let updated = match timeout(budget, state.definitions.update(&name, payload)).await {
        Err(_) => return timeout_response("update"),
        Ok(Err(err)) => return store_error_response(err),
        Ok(Ok(updated)) => updated,
    };

    state.routes.rekey(&old_key, &updated).await;
    info!(name = %name, key = %updated.route_key(), "API updated");

    (
        StatusCode::OK,
        Json(json!({
            "message": "API updated successfully",
            "api": updated,
        })),
    )
        .into_response()
}

/// DELETE /api-generator/delete/:name
pub async fn delete_definition(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let budget = crud_budget(&state);

    // Resolve first so the cache key is known even after the row is gone.
    let existing = match timeout(budget, state.definitions.get_by_name(&name)).await {
        Err(_) => return timeout_response("delete"),
        Ok(Err(err)) => return store_error_response(err),
        Ok(Ok(existing)) => existing,
    };

    match timeout(budget, state.definitions.delete(&name)).await {
        Err(_) => return timeout_response("delete"),
        Ok(Err(err)) => return store_error_response(err),
        Ok(Ok(_)) => {}
    }

    state.routes.remove(&existing.method, &existing.endpoint).await;
    info!(name = %name, "API deleted");

    (
        StatusCode::OK,
        Json(json!({"message": "API deleted successfully"})),
    )
        .into_response()
}

/// POST /api-generator/reload
///
/// Admin operation: rebuild the route table from the store in one atomic
/// swap, recovering from any missed cache update.
pub async fn reload_definitions(State(state): State<AppState>) -> Response {
    match timeout(crud_budget(&state), state.definitions.list()).await {
        Err(_) => timeout_response("reload"),
        Ok(Err(err)) => store_error_response(err),
        Ok(Ok(definitions)) => {
            let count = state.routes.replace_all(definitions).await;
            info!(count, "route table reloaded");
            (
                StatusCode::OK,
                Json(json!({
                    "message": "APIs reloaded successfully",
                    "loadedCount": count,
                })),
            )
                .into_response()
        }
    }
}
