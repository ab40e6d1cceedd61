use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::adapters::dynamic_handler::{
    build_request_data, dispatch, extract_status_code, find_missing_required, shape_response,
};
use crate::adapters::route_table::RouteTable;
use crate::adapters::AppState;
use crate::config::TimeoutSettings;
use crate::domain::{ApiDefinition, Parameter};
use crate::persistence::{DataRepository, DefinitionRepository, StoreError};

/// Recorded call to the mock data repository.
#[derive(Debug, Clone, PartialEq)]
struct SavedRecord {
    database: String,
    collection: String,
    unique_key: String,
    data: Map<String, Value>,
}

#[derive(Default)]
struct MockData {
    find_results: Vec<Value>,
    saves: Mutex<Vec<SavedRecord>>,
    deletes: Mutex<Vec<Map<String, Value>>>,
}

#[async_trait]
impl DataRepository for MockData {
    async fn find(
        &self,
        _database: &str,
        _collection: &str,
        _filter: &Map<String, Value>,
    ) -> Result<Vec<Value>, StoreError> {
        Ok(self.find_results.clone())
    }

    async fn save(
        &self,
        database: &str,
        collection: &str,
        unique_key: &str,
        data: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.saves.lock().await.push(SavedRecord {
            database: database.to_string(),
            collection: collection.to_string(),
            unique_key: unique_key.to_string(),
            data: data.clone(),
        });
        Ok(())
    }

    async fn delete(
        &self,
        _database: &str,
        _collection: &str,
        filter: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        self.deletes.lock().await.push(filter.clone());
        Ok(1)
    }
}

struct MockDefinitions {
    definitions: Vec<ApiDefinition>,
}

#[async_trait]
impl DefinitionRepository for MockDefinitions {
    async fn create(&self, _definition: ApiDefinition) -> Result<ApiDefinition, StoreError> {
        Err(StoreError::Config("not supported in tests".into()))
    }

    async fn list(&self) -> Result<Vec<ApiDefinition>, StoreError> {
        Ok(self.definitions.clone())
    }

    async fn get_by_name(&self, name: &str) -> Result<ApiDefinition, StoreError> {
        self.definitions
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(
        &self,
        _name: &str,
        _payload: ApiDefinition,
    ) -> Result<ApiDefinition, StoreError> {
        Err(StoreError::Config("not supported in tests".into()))
    }

    async fn delete(&self, _name: &str) -> Result<u64, StoreError> {
        Err(StoreError::Config("not supported in tests".into()))
    }
}

async fn state_with(definitions: Vec<ApiDefinition>, data: Arc<MockData>) -> AppState {
    let routes = RouteTable::new();
    for definition in &definitions {
        routes.insert(definition).await;
    }
    AppState {
        definitions: Arc::new(MockDefinitions { definitions }),
        data,
        routes,
        timeouts: TimeoutSettings::default(),
    }
}

fn definition(value: Value) -> ApiDefinition {
    serde_json::from_value(value).unwrap()
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn response_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

#[tokio::test]
async fn test_default_post_echoes_body_and_upserts() {
    let data_repo = Arc::new(MockData::default());
    let state = state_with(
        vec![definition(json!({
            "name": "u",
            "method": "POST",
            "endpoint": "/u",
            "database": "app",
            "collection": "users",
            "uniqueKey": "id",
            "parameters": [{"name": "id", "required": true}]
        }))],
        data_repo.clone(),
    )
    .await;

    let response = dispatch(
        State(state),
        request("POST", "/u", Some(json!({"id": "7", "name": "Ada"}))),
    )
    .await;
    let (status, body) = response_json(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"id": "7", "name": "Ada"}));

    let saves = data_repo.saves.lock().await;
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].database, "app");
    assert_eq!(saves[0].collection, "users");
    assert_eq!(saves[0].unique_key, "id");
    assert_eq!(saves[0].data["name"], json!("Ada"));
}

#[tokio::test]
async fn test_missing_required_parameter_is_rejected() {
    let state = state_with(
        vec![definition(json!({
            "name": "u",
            "method": "POST",
            "endpoint": "/u",
            "database": "app",
            "collection": "users",
            "parameters": [{"name": "id", "required": true}]
        }))],
        Arc::new(MockData::default()),
    )
    .await;

    let response = dispatch(
        State(state),
        request("POST", "/u", Some(json!({"name": "Ada"}))),
    )
    .await;
    let (status, body) = response_json(response).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        json!("Missing or empty required parameter: id")
    );
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let state = state_with(vec![], Arc::new(MockData::default())).await;
    let response = dispatch(State(state), request("GET", "/nothing", None)).await;
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("/nothing"));
}

#[tokio::test]
async fn test_default_get_uses_data_map_as_filter() {
    let data_repo = Arc::new(MockData {
        find_results: vec![json!({"id": "7", "name": "Ada"})],
        ..Default::default()
    });
    let state = state_with(
        vec![definition(json!({
            "name": "u",
            "method": "GET",
            "endpoint": "/u",
            "database": "app",
            "collection": "users"
        }))],
        data_repo.clone(),
    )
    .await;

    let response = dispatch(State(state), request("GET", "/u?id=7", None)).await;
    let (status, body) = response_json(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": "7", "name": "Ada"}]));
    assert!(data_repo.saves.lock().await.is_empty());
}

#[tokio::test]
async fn test_default_delete_requires_a_filter() {
    let data_repo = Arc::new(MockData::default());
    let state = state_with(
        vec![definition(json!({
            "name": "u",
            "method": "DELETE",
            "endpoint": "/u",
            "database": "app",
            "collection": "users"
        }))],
        data_repo.clone(),
    )
    .await;

    let response = dispatch(State(state.clone()), request("DELETE", "/u", None)).await;
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("DELETE requires"));

    let response = dispatch(State(state), request("DELETE", "/u?id=7", None)).await;
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "deletedCount": 1}));
    assert_eq!(data_repo.deletes.lock().await.len(), 1);
}

#[tokio::test]
async fn test_path_parameters_win_over_query_and_body() {
    let data_repo = Arc::new(MockData::default());
    let state = state_with(
        vec![definition(json!({
            "name": "u",
            "method": "POST",
            "endpoint": "/u/:id",
            "database": "app",
            "collection": "users"
        }))],
        data_repo.clone(),
    )
    .await;

    let response = dispatch(
        State(state),
        request(
            "POST",
            "/u/path-id?id=query-id&extra=q",
            Some(json!({"id": "body-id", "name": "Ada"})),
        ),
    )
    .await;
    let (status, body) = response_json(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!("path-id"));
    assert_eq!(body["extra"], json!("q"));
    assert_eq!(body["name"], json!("Ada"));
}

#[tokio::test]
async fn test_flow_response_with_status_code_override() {
    let state = state_with(
        vec![definition(json!({
            "name": "teapot",
            "method": "GET",
            "endpoint": "/teapot",
            "database": "app",
            "collection": "pots",
            "conditionalFlow": {
                "conditions": [],
                "then": {
                    "type": "return",
                    "returnData": {"statusCode": 418, "short": true}
                }
            }
        }))],
        Arc::new(MockData::default()),
    )
    .await;

    let response = dispatch(State(state), request("GET", "/teapot", None)).await;
    let (status, body) = response_json(response).await;
    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body["short"], json!(true));
}

#[tokio::test]
async fn test_flow_save_uses_final_data_state() {
    let data_repo = Arc::new(MockData::default());
    let state = state_with(
        vec![definition(json!({
            "name": "order",
            "method": "POST",
            "endpoint": "/order",
            "database": "shop",
            "collection": "orders",
            "uniqueKey": "id",
            "conditionalFlow": {
                "conditions": [],
                "then": {
                    "type": "return",
                    "saveData": true,
                    "transform": [
                        {"operation": "calculate", "field": "total", "formula": "add:$price,$tax"}
                    ],
                    "returnData": {"total": "$total"}
                }
            }
        }))],
        data_repo.clone(),
    )
    .await;

    let response = dispatch(
        State(state),
        request("POST", "/order", Some(json!({"id": "1", "price": 10, "tax": 2}))),
    )
    .await;
    let (status, body) = response_json(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"total": 12.0}));

    let saves = data_repo.saves.lock().await;
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].data["total"], json!(12.0));
    assert_eq!(saves[0].data["price"], json!(10));
}

#[test]
fn test_build_request_data_precedence() {
    let mut path_params = HashMap::new();
    path_params.insert("id".to_string(), "path".to_string());

    let body = json!({"id": "body", "b": 2}).as_object().unwrap().clone();
    let data = build_request_data(&path_params, Some("id=query&q=hello+world&enc=%C3%A9"), Some(body));

    assert_eq!(data["id"], json!("path"));
    assert_eq!(data["q"], json!("hello world"));
    assert_eq!(data["enc"], json!("é"));
    assert_eq!(data["b"], json!(2));
}

#[test]
fn test_find_missing_required_values() {
    let parameters = vec![
        Parameter {
            name: "id".to_string(),
            param_type: "string".to_string(),
            required: true,
        },
        Parameter {
            name: "note".to_string(),
            param_type: String::new(),
            required: false,
        },
    ];

    let ok = json!({"id": "7"}).as_object().unwrap().clone();
    assert!(find_missing_required(&parameters, &ok).is_none());

    let zero = json!({"id": 0}).as_object().unwrap().clone();
    assert!(find_missing_required(&parameters, &zero).is_none());

    for bad in [json!({}), json!({"id": null}), json!({"id": ""})] {
        let data = bad.as_object().unwrap().clone();
        assert_eq!(find_missing_required(&parameters, &data), Some("id"));
    }
}

#[test]
fn test_shape_response_folds_and_defaults() {
    assert_eq!(shape_response(Value::Null), json!({"success": true}));
    assert_eq!(
        shape_response(json!([{"Key": "a", "Value": 1}])),
        json!({"a": 1})
    );
    assert_eq!(shape_response(json!([1, 2])), json!([1, 2]));
}

#[test]
fn test_extract_status_code_paths() {
    assert_eq!(
        extract_status_code(&json!({"statusCode": 201})),
        Some(StatusCode::CREATED)
    );
    assert_eq!(
        extract_status_code(&json!({"opdResult": {"statusCode": 404.0}})),
        Some(StatusCode::NOT_FOUND)
    );
    assert_eq!(extract_status_code(&json!({"other": 1})), None);
    assert_eq!(extract_status_code(&json!([1])), None);
    assert_eq!(extract_status_code(&json!({"statusCode": 99})), None);
}
