//! In-memory route table: a read-optimised cache of registered definitions
//! keyed by `METHOD:PATH`.
//!
//! The definition store is authoritative; the table is updated eagerly on
//! every definition CRUD and can be rebuilt wholesale via reload. Readers
//! take the shared lock, writers the exclusive lock; an update's
//! delete-old-key/insert-new-key pair happens inside one exclusive section
//! so readers never observe the intermediate state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::ApiDefinition;

pub fn route_key(method: &str, endpoint: &str) -> String {
    format!("{method}:{endpoint}")
}

#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Arc<RwLock<HashMap<String, ApiDefinition>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the definition serving `method` + `path`.
    ///
    /// Exact keys win; otherwise registered `:param` templates are matched
    /// segment-by-segment and the extracted path parameters are returned
    /// alongside the definition.
    pub async fn lookup(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(ApiDefinition, HashMap<String, String>)> {
        let routes = self.routes.read().await;

        if let Some(definition) = routes.get(&route_key(method, path)) {
            return Some((definition.clone(), HashMap::new()));
        }

        for (key, definition) in routes.iter() {
            let Some((key_method, template)) = key.split_once(':') else {
                continue;
            };
            if key_method != method {
                continue;
            }
            if let Some(params) = match_template(template, path) {
                return Some((definition.clone(), params));
            }
        }
        None
    }

    pub async fn insert(&self, definition: &ApiDefinition) {
        let key = definition.route_key();
        let mut routes = self.routes.write().await;
        routes.insert(key.clone(), definition.clone());
        info!(%key, name = %definition.name, "route cached");
    }

    pub async fn remove(&self, method: &str, endpoint: &str) {
        let key = route_key(method, endpoint);
        let mut routes = self.routes.write().await;
        routes.remove(&key);
        info!(%key, "route evicted");
    }

    /// Replace the entry for `old_key` with the updated definition. The
    /// delete and insert share one exclusive section.
    pub async fn rekey(&self, old_key: &str, definition: &ApiDefinition) {
        let new_key = definition.route_key();
        let mut routes = self.routes.write().await;
        if old_key != new_key {
            routes.remove(old_key);
        }
        routes.insert(new_key, definition.clone());
    }

    /// Atomically replace the whole table with a freshly loaded snapshot.
    /// Definitions with an empty method or endpoint are skipped; duplicate
    /// keys keep the last definition seen.
    pub async fn replace_all(&self, definitions: Vec<ApiDefinition>) -> usize {
        let mut snapshot = HashMap::new();
        for definition in definitions {
            if definition.method.is_empty() || definition.endpoint.is_empty() {
                warn!(name = %definition.name, "skipping definition with empty method or endpoint");
                continue;
            }
            let key = definition.route_key();
            if let Some(previous) = snapshot.insert(key.clone(), definition) {
                warn!(%key, loser = %previous.name, "duplicate route key during load");
            }
        }
        let count = snapshot.len();
        *self.routes.write().await = snapshot;
        count
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }
}

/// Match a `:param` path template against a concrete path, returning the
/// bound parameters. Templates without parameters are handled by the exact
/// lookup and never match here.
fn match_template(template: &str, path: &str) -> Option<HashMap<String, String>> {
    if !template.contains(':') {
        return None;
    }

    let template_segments: Vec<&str> = template.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if template_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    for (template_segment, path_segment) in template_segments.iter().zip(&path_segments) {
        match template_segment.strip_prefix(':') {
            Some(name) => {
                if path_segment.is_empty() {
                    return None;
                }
                params.insert(name.to_string(), path_segment.to_string());
            }
            None => {
                if template_segment != path_segment {
                    return None;
                }
            }
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, method: &str, endpoint: &str) -> ApiDefinition {
        ApiDefinition {
            name: name.to_string(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            database: "app".to_string(),
            collection: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_exact_lookup() {
        let table = RouteTable::new();
        table.insert(&definition("users", "GET", "/users")).await;

        let (found, params) = table.lookup("GET", "/users").await.unwrap();
        assert_eq!(found.name, "users");
        assert!(params.is_empty());

        assert!(table.lookup("POST", "/users").await.is_none());
        assert!(table.lookup("GET", "/other").await.is_none());
    }

    #[tokio::test]
    async fn test_template_lookup_extracts_parameters() {
        let table = RouteTable::new();
        table
            .insert(&definition("user-detail", "GET", "/users/:id/orders/:order"))
            .await;

        let (found, params) = table.lookup("GET", "/users/7/orders/42").await.unwrap();
        assert_eq!(found.name, "user-detail");
        assert_eq!(params["id"], "7");
        assert_eq!(params["order"], "42");

        assert!(table.lookup("GET", "/users/7").await.is_none());
        assert!(table.lookup("GET", "/users//orders/42").await.is_none());
    }

    #[tokio::test]
    async fn test_rekey_moves_changed_routes() {
        let table = RouteTable::new();
        let original = definition("api", "GET", "/old");
        table.insert(&original).await;

        let updated = definition("api", "GET", "/new");
        table.rekey(&original.route_key(), &updated).await;

        assert!(table.lookup("GET", "/old").await.is_none());
        assert!(table.lookup("GET", "/new").await.is_some());
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_rekey_with_unchanged_key_refreshes_entry() {
        let table = RouteTable::new();
        let mut def = definition("api", "GET", "/same");
        table.insert(&def).await;

        def.collection = "renamed".to_string();
        table.rekey(&def.route_key(), &def).await;

        let (found, _) = table.lookup("GET", "/same").await.unwrap();
        assert_eq!(found.collection, "renamed");
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_replace_all_skips_invalid_and_counts() {
        let table = RouteTable::new();
        table.insert(&definition("stale", "GET", "/stale")).await;

        let count = table
            .replace_all(vec![
                definition("a", "GET", "/a"),
                definition("broken", "", "/b"),
                definition("b", "POST", "/b"),
            ])
            .await;

        assert_eq!(count, 2);
        assert!(table.lookup("GET", "/stale").await.is_none());
        assert!(table.lookup("GET", "/a").await.is_some());
        assert!(table.lookup("POST", "/b").await.is_some());
    }
}
