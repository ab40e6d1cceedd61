//! Repository traits for the persistence layer.
//!
//! The interpreter and the HTTP adapters depend only on these traits; the
//! MongoDB implementations live in [`crate::persistence::mongo`]. Tests
//! substitute in-memory mocks.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::domain::ApiDefinition;
use crate::persistence::error::StoreError;

/// CRUD over persisted API definitions.
///
/// Implementations enforce uniqueness of `name` and of
/// `(method, endpoint)`, and reject writes with empty required fields.
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    /// Persist a new definition and return it with its assigned id and
    /// creation timestamp.
    async fn create(&self, definition: ApiDefinition) -> Result<ApiDefinition, StoreError>;

    /// All definitions, sorted by name.
    async fn list(&self) -> Result<Vec<ApiDefinition>, StoreError>;

    /// Fetch one definition by its unique name.
    async fn get_by_name(&self, name: &str) -> Result<ApiDefinition, StoreError>;

    /// Replace-style update of the definition named `name`. Returns the
    /// post-update document (read-after-write).
    async fn update(
        &self,
        name: &str,
        payload: ApiDefinition,
    ) -> Result<ApiDefinition, StoreError>;

    /// Delete by name, returning the number of removed documents.
    async fn delete(&self, name: &str) -> Result<u64, StoreError>;
}

/// Find/save/delete over operator-specified databases and collections.
#[async_trait]
pub trait DataRepository: Send + Sync {
    /// Query documents matching `filter`; empty result is not an error.
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &Map<String, Value>,
    ) -> Result<Vec<Value>, StoreError>;

    /// Insert `data`, or upsert it by `unique_key` when the key names a
    /// present, non-empty field of `data`.
    async fn save(
        &self,
        database: &str,
        collection: &str,
        unique_key: &str,
        data: &Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Delete documents matching `filter`, returning the count. An empty
    /// filter is refused.
    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: &Map<String, Value>,
    ) -> Result<u64, StoreError>;
}
