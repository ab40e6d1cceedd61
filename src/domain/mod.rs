//! Core domain types: API definitions and the conditional flow vocabulary.
//!
//! These structs mirror the wire format used by the definition management
//! endpoints (camelCase JSON) and the persisted documents in the definition
//! collection. Action and condition discriminators are kept as plain strings
//! so that definitions with unknown tags still deserialize; the interpreter
//! turns unknown tags into warnings or structured errors instead of refusing
//! the whole document.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A registered dynamic endpoint: routing metadata, the target data
/// collection and the optional conditional flow evaluated per request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiDefinition {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Globally unique definition name, also the key for cross-endpoint calls.
    pub name: String,
    /// HTTP verb, stored uppercase.
    pub method: String,
    /// HTTP path template; segments of the form `:param` bind path parameters.
    pub endpoint: String,
    /// Target database for dynamic data operations.
    pub database: String,
    /// Target collection for dynamic data operations.
    pub collection: String,
    /// Field name used to upsert saved data. Empty/absent means plain insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_key: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    /// Root of the flow tree; absent means the default verb logic applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_flow: Option<ConditionalBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl ApiDefinition {
    /// Cache key for the route table.
    pub fn route_key(&self) -> String {
        format!("{}:{}", self.method, self.endpoint)
    }

    pub fn unique_key(&self) -> &str {
        self.unique_key.as_deref().unwrap_or("")
    }
}

/// Declared request parameter. `param_type` is informational; only
/// `required` is enforced by the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
}

/// A block of AND-ed conditions with the actions taken on either outcome.
/// An empty condition list always selects `then`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionalBlock {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Box<Action>>,
    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub otherwise: Option<Box<Action>>,
}

/// A single comparison of a dotted field path against a literal value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    /// One of `eq`, `neq`, `contains`, `in`, `gt`, `lt`, `gte`, `lte`.
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

/// Tagged action envelope. `transform` and `save_data` are shared by all
/// action kinds; the payload fields are read according to `kind`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Action {
    /// One of `return`, `continue`, `conditionalBlock`, `apiCall`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transform: Vec<Transformation>,
    pub save_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_flow: Option<ConditionalBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_call: Option<ApiCall>,
}

/// Data map rewrite step applied before an action body executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transformation {
    /// One of `set`, `remove`, `append`, `calculate`.
    pub operation: String,
    pub field: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub value: Value,
    /// `calculate` formula, e.g. `add:$price,$tax,-$discount,1.5`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub formula: String,
}

/// Invocation of another registered definition by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiCall {
    pub api_name: String,
    /// Parameter templates; string values starting with `$` are resolved
    /// against the caller's data map.
    pub parameters: Map<String, Value>,
    /// Dotted path in the caller's data map where the response is stored.
    pub result_field: String,
}
