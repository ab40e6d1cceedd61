//! MongoDB-backed implementations of the repository traits.
//!
//! One client serves both concerns: API definitions live in a fixed
//! collection of the configured database, dynamic data operations address
//! whatever database/collection the matched definition names.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::MongoSettings;
use crate::domain::ApiDefinition;
use crate::engine::coerce::canonical_string;
use crate::persistence::error::StoreError;
use crate::persistence::repository::{DataRepository, DefinitionRepository};

const NAME_INDEX: &str = "name_1";
const ENDPOINT_INDEX: &str = "method_1_endpoint_1";

pub struct MongoStore {
    client: Client,
    definitions: Collection<ApiDefinition>,
}

impl MongoStore {
    /// Connect, ping and return a store handle.
    pub async fn connect(settings: &MongoSettings) -> Result<Self, StoreError> {
        if settings.uri.is_empty() || settings.db_name.is_empty() {
            return Err(StoreError::Config(
                "MongoDB URI and database name cannot be empty".to_string(),
            ));
        }

        let client = Client::with_uri_str(&settings.uri).await?;
        client
            .database("admin")
            .run_command(doc! {"ping": 1})
            .await?;
        info!("Connected to MongoDB at {}", settings.uri);

        let definitions = client
            .database(&settings.db_name)
            .collection::<ApiDefinition>(&settings.definitions_collection);

        Ok(Self {
            client,
            definitions,
        })
    }

    /// Ensure the uniqueness indexes on `name` and `(method, endpoint)`.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let models = [
            IndexModel::builder()
                .keys(doc! {"name": 1})
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name(NAME_INDEX.to_string())
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! {"method": 1, "endpoint": 1})
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .name(ENDPOINT_INDEX.to_string())
                        .build(),
                )
                .build(),
        ];
        for model in models {
            self.definitions.create_index(model).await?;
        }
        Ok(())
    }

    fn dynamic_collection(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Collection<Document>, StoreError> {
        if database.is_empty() || collection.is_empty() {
            return Err(StoreError::Config(
                "database and collection names cannot be empty for dynamic operations".to_string(),
            ));
        }
        Ok(self.client.database(database).collection(collection))
    }
}

/// Required fields for a definition write: everything the dispatcher needs
/// to route and target the request.
fn validate_required(definition: &ApiDefinition, include_name: bool) -> Result<(), StoreError> {
    let mut required = vec![
        definition.method.as_str(),
        definition.endpoint.as_str(),
        definition.database.as_str(),
        definition.collection.as_str(),
    ];
    if include_name {
        required.push(definition.name.as_str());
    }
    if required.iter().any(|field| field.is_empty()) {
        return Err(StoreError::MissingRequiredFields);
    }
    Ok(())
}

/// Translate a driver duplicate-key error into the constraint-specific
/// variant, using the index name embedded in the error message.
fn classify_duplicate(message: &str, definition: &ApiDefinition) -> Option<StoreError> {
    if !message.contains("E11000") && !message.contains("duplicate key") {
        return None;
    }
    if message.contains(NAME_INDEX) {
        return Some(StoreError::DuplicateName(definition.name.clone()));
    }
    if message.contains(ENDPOINT_INDEX) {
        return Some(StoreError::DuplicateEndpoint(format!(
            "{} {}",
            definition.method, definition.endpoint
        )));
    }
    Some(StoreError::DuplicateKey)
}

fn to_filter_document(filter: &Map<String, Value>) -> Result<Document, StoreError> {
    mongodb::bson::to_document(filter).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn document_to_value(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

/// Build the `$set` payload for an upsert: everything except the record id
/// and the unique key itself, which drives the filter. `None` means only
/// the key was supplied and there is nothing to update.
fn build_upsert_set(unique_key: &str, data: &Map<String, Value>) -> Option<Map<String, Value>> {
    let set: Map<String, Value> = data
        .iter()
        .filter(|(k, _)| k.as_str() != "_id" && k.as_str() != unique_key)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

/// Whether `data` carries a usable upsert key value: present, non-null and
/// with a non-empty string form.
fn upsert_key_value<'a>(unique_key: &str, data: &'a Map<String, Value>) -> Option<&'a Value> {
    if unique_key.is_empty() {
        return None;
    }
    data.get(unique_key)
        .filter(|v| !v.is_null() && !canonical_string(v).is_empty())
}

#[async_trait]
impl DefinitionRepository for MongoStore {
    async fn create(&self, mut definition: ApiDefinition) -> Result<ApiDefinition, StoreError> {
        validate_required(&definition, true)?;
        definition.method = definition.method.to_uppercase();

        // Proactive duplicate checks; the unique indexes still backstop
        // races, mapped below.
        if self
            .definitions
            .find_one(doc! {"name": &definition.name})
            .await?
            .is_some()
        {
            return Err(StoreError::DuplicateName(definition.name));
        }
        if self
            .definitions
            .find_one(doc! {"method": &definition.method, "endpoint": &definition.endpoint})
            .await?
            .is_some()
        {
            return Err(StoreError::DuplicateEndpoint(format!(
                "{} {}",
                definition.method, definition.endpoint
            )));
        }

        definition.id = Some(ObjectId::new());
        definition.created_at = Some(chrono::Utc::now().to_rfc3339());
        definition.updated_at = None;

        if let Err(err) = self.definitions.insert_one(&definition).await {
            if let Some(duplicate) = classify_duplicate(&err.to_string(), &definition) {
                warn!(name = %definition.name, "duplicate key on insert (lost race)");
                return Err(duplicate);
            }
            return Err(err.into());
        }

        info!(name = %definition.name, endpoint = %definition.endpoint, "API definition created");
        Ok(definition)
    }

    async fn list(&self) -> Result<Vec<ApiDefinition>, StoreError> {
        let cursor = self.definitions.find(doc! {}).sort(doc! {"name": 1}).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn get_by_name(&self, name: &str) -> Result<ApiDefinition, StoreError> {
        self.definitions
            .find_one(doc! {"name": name})
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn update(
        &self,
        name: &str,
        mut payload: ApiDefinition,
    ) -> Result<ApiDefinition, StoreError> {
        validate_required(&payload, false)?;
        payload.method = payload.method.to_uppercase();

        let existing = self.get_by_name(name).await?;

        // If the routing key changed, check for a collision with any other
        // document.
        if existing.method != payload.method || existing.endpoint != payload.endpoint {
            let conflict = self
                .definitions
                .find_one(doc! {
                    "method": &payload.method,
                    "endpoint": &payload.endpoint,
                    "_id": {"$ne": existing.id},
                })
                .await?;
            if conflict.is_some() {
                return Err(StoreError::DuplicateEndpoint(format!(
                    "{} {}",
                    payload.method, payload.endpoint
                )));
            }
        }

        let parameters = mongodb::bson::to_bson(&payload.parameters)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let conditional_flow = mongodb::bson::to_bson(&payload.conditional_flow)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let unique_key = mongodb::bson::to_bson(&payload.unique_key)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let update = doc! {"$set": doc! {
            "method": &payload.method,
            "endpoint": &payload.endpoint,
            "database": &payload.database,
            "collection": &payload.collection,
            "uniqueKey": unique_key,
            "parameters": parameters,
            "conditionalFlow": conditional_flow,
            "updatedAt": chrono::Utc::now().to_rfc3339(),
        }};

        let result = self
            .definitions
            .update_one(doc! {"name": name}, update)
            .await
            .map_err(|err| {
                classify_duplicate(&err.to_string(), &payload)
                    .unwrap_or_else(|| StoreError::UpdateFailed(err.to_string()))
            })?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound);
        }

        // Read-after-write: return the post-update document.
        self.definitions
            .find_one(doc! {"_id": existing.id})
            .await?
            .ok_or_else(|| {
                StoreError::UpdateFailed(
                    "database updated, but failed to retrieve result".to_string(),
                )
            })
    }

    async fn delete(&self, name: &str) -> Result<u64, StoreError> {
        let result = self
            .definitions
            .delete_one(doc! {"name": name})
            .await
            .map_err(|err| StoreError::DeleteFailed(err.to_string()))?;
        if result.deleted_count == 0 {
            return Err(StoreError::NotFound);
        }
        info!(name, "API definition deleted");
        Ok(result.deleted_count)
    }
}

#[async_trait]
impl DataRepository for MongoStore {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &Map<String, Value>,
    ) -> Result<Vec<Value>, StoreError> {
        let coll = self.dynamic_collection(database, collection)?;
        let filter = to_filter_document(filter)?;
        debug!(%database, %collection, ?filter, "finding dynamic data");

        let cursor = coll.find(filter).await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents.into_iter().map(document_to_value).collect())
    }

    async fn save(
        &self,
        database: &str,
        collection: &str,
        unique_key: &str,
        data: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let coll = self.dynamic_collection(database, collection)?;

        if let Some(key_value) = upsert_key_value(unique_key, data) {
            let Some(set) = build_upsert_set(unique_key, data) else {
                debug!(%unique_key, "upsert skipped, only the key field was supplied");
                return Ok(());
            };

            let key_bson = mongodb::bson::to_bson(key_value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let mut filter = Document::new();
            filter.insert(unique_key, key_bson);
            let set_doc = to_filter_document(&set)?;
            coll.update_one(filter, doc! {"$set": set_doc})
                .upsert(true)
                .await
                .map_err(|err| StoreError::SaveFailed(err.to_string()))?;
            debug!(%database, %collection, %unique_key, "data upserted");
        } else {
            let document = to_filter_document(data)?;
            coll.insert_one(document)
                .await
                .map_err(|err| StoreError::SaveFailed(err.to_string()))?;
            debug!(%database, %collection, "data inserted");
        }
        Ok(())
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        let coll = self.dynamic_collection(database, collection)?;
        if filter.is_empty() {
            return Err(StoreError::DeleteFailed(
                "empty filter provided for delete operation".to_string(),
            ));
        }

        let filter = to_filter_document(filter)?;
        let result = coll
            .delete_many(filter)
            .await
            .map_err(|err| StoreError::DeleteFailed(err.to_string()))?;
        debug!(%database, %collection, count = result.deleted_count, "dynamic data deleted");
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_definition() -> ApiDefinition {
        ApiDefinition {
            name: "users".to_string(),
            method: "POST".to_string(),
            endpoint: "/u".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_required_rejects_empty_fields() {
        let mut def = sample_definition();
        assert!(matches!(
            validate_required(&def, true),
            Err(StoreError::MissingRequiredFields)
        ));
        def.database = "app".to_string();
        def.collection = "users".to_string();
        assert!(validate_required(&def, true).is_ok());

        def.name = String::new();
        assert!(matches!(
            validate_required(&def, true),
            Err(StoreError::MissingRequiredFields)
        ));
        // update-style validation ignores the name field
        assert!(validate_required(&def, false).is_ok());
    }

    #[test]
    fn test_classify_duplicate_by_index_name() {
        let def = sample_definition();
        assert!(matches!(
            classify_duplicate("E11000 duplicate key error, index: name_1", &def),
            Some(StoreError::DuplicateName(_))
        ));
        assert!(matches!(
            classify_duplicate(
                "E11000 duplicate key error, index: method_1_endpoint_1",
                &def
            ),
            Some(StoreError::DuplicateEndpoint(_))
        ));
        assert!(matches!(
            classify_duplicate("E11000 duplicate key error, index: other", &def),
            Some(StoreError::DuplicateKey)
        ));
        assert!(classify_duplicate("connection reset", &def).is_none());
    }

    #[test]
    fn test_build_upsert_set_excludes_id_and_key() {
        let data = json!({"id": "7", "_id": "abc", "name": "Ada"})
            .as_object()
            .unwrap()
            .clone();
        let set = build_upsert_set("id", &data).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set["name"], json!("Ada"));

        let key_only = json!({"id": "7"}).as_object().unwrap().clone();
        assert!(build_upsert_set("id", &key_only).is_none());
    }

    #[test]
    fn test_upsert_key_value_requires_non_empty_form() {
        let data = json!({"id": "7", "empty": "", "none": null, "zero": 0})
            .as_object()
            .unwrap()
            .clone();
        assert!(upsert_key_value("id", &data).is_some());
        assert!(upsert_key_value("empty", &data).is_none());
        assert!(upsert_key_value("none", &data).is_none());
        assert!(upsert_key_value("missing", &data).is_none());
        // numeric zero has the string form "0", which is usable
        assert!(upsert_key_value("zero", &data).is_some());
        assert!(upsert_key_value("", &data).is_none());
    }
}
