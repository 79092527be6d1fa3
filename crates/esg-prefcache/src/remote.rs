//! Server-side collaborators of the cache: mapping fetchers and preference sync.
//!
//! Both seams have an in-process implementation (`IdentityResolver`,
//! `PreferenceStore`) and an HTTP one (`ConsoleClient`) speaking to the
//! console API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use esg_core::types::TableFieldMapping;
use esg_fieldmap::IdentityResolver;
use esg_prefs::PreferenceStore;
use esg_prefs::types::{Namespace, PreferenceIdentity, PreferenceType, SetOptions};

use crate::error::{CacheError, CacheResult};
use crate::migration::TablePreferences;

macro_rules! map_err {
    ($variant:ident) => {
        |e| CacheError::$variant(e.to_string())
    };
}

/// Preference key under which a table's blob is synced.
pub const TABLE_PREFERENCES_KEY: &str = "tablePreferences";

/// Source of field mappings for the cache.
#[async_trait]
pub trait MappingFetcher: Send + Sync {
    async fn fetch_mapping(&self, table_id: &str) -> CacheResult<Option<TableFieldMapping>>;
}

/// Remote copy of a user's table preferences.
#[async_trait]
pub trait PreferenceSync: Send + Sync {
    async fn push(&self, user_id: &str, table_id: &str, prefs: &TablePreferences) -> CacheResult<()>;
    async fn pull(&self, user_id: &str, table_id: &str) -> CacheResult<Option<TablePreferences>>;
}

fn table_identity(user_id: &str, table_id: &str) -> PreferenceIdentity {
    PreferenceIdentity::new(user_id, Namespace::Table, TABLE_PREFERENCES_KEY)
        .with_table(Some(table_id.to_string()))
}

// ── In-process ─────────────────────────────────────────────────────

#[async_trait]
impl MappingFetcher for IdentityResolver {
    async fn fetch_mapping(&self, table_id: &str) -> CacheResult<Option<TableFieldMapping>> {
        self.refresh_field_mapping(table_id)
            .await
            .map_err(map_err!(Remote))
    }
}

#[async_trait]
impl PreferenceSync for PreferenceStore {
    async fn push(&self, user_id: &str, table_id: &str, prefs: &TablePreferences) -> CacheResult<()> {
        let value = serde_json::to_value(prefs).map_err(map_err!(Serialize))?;
        self.set(
            &table_identity(user_id, table_id),
            value,
            PreferenceType::Json,
            &SetOptions::default(),
        )
        .await
        .map_err(map_err!(Remote))?;
        Ok(())
    }

    async fn pull(&self, user_id: &str, table_id: &str) -> CacheResult<Option<TablePreferences>> {
        let Some(record) = self
            .get(&table_identity(user_id, table_id), false)
            .await
            .map_err(map_err!(Remote))?
        else {
            return Ok(None);
        };
        let prefs = serde_json::from_value(record.value.to_json()).map_err(map_err!(Deserialize))?;
        Ok(Some(prefs))
    }
}

// ── HTTP ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct StoredPreference {
    value: serde_json::Value,
}

/// Client for the console API's mapping and preference endpoints.
#[derive(Clone)]
pub struct ConsoleClient {
    http: Client,
    base_url: Url,
}

impl ConsoleClient {
    pub fn new(base_url: &str, timeout: Duration) -> CacheResult<Self> {
        let base_url = Url::parse(base_url).map_err(map_err!(Remote))?;
        if base_url.cannot_be_a_base() {
            return Err(CacheError::Remote(format!("not a base URL: {base_url}")));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(map_err!(Remote))?;
        Ok(Self { http, base_url })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn preference_url(&self, user_id: &str, table_id: &str) -> Url {
        let mut url = self.url(&["api", "preferences", user_id, "table", TABLE_PREFERENCES_KEY]);
        url.query_pairs_mut().append_pair("tableId", table_id);
        url
    }
}

async fn error_for(response: reqwest::Response) -> CacheError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    CacheError::Remote(format!("{status}: {body}"))
}

#[async_trait]
impl MappingFetcher for ConsoleClient {
    async fn fetch_mapping(&self, table_id: &str) -> CacheResult<Option<TableFieldMapping>> {
        let mut url = self.url(&["api", "tables", table_id, "field-mapping"]);
        url.query_pairs_mut().append_pair("refresh", "true");
        let response = self.http.get(url).send().await.map_err(map_err!(Remote))?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(%table_id, "server has no field mapping");
                Ok(None)
            }
            s if s.is_success() => {
                let mapping = response.json().await.map_err(map_err!(Deserialize))?;
                Ok(Some(mapping))
            }
            _ => Err(error_for(response).await),
        }
    }
}

#[async_trait]
impl PreferenceSync for ConsoleClient {
    async fn push(&self, user_id: &str, table_id: &str, prefs: &TablePreferences) -> CacheResult<()> {
        let body = json!({
            "value": prefs,
            "type": "json",
            "tableId": table_id,
        });
        let response = self
            .http
            .put(self.url(&["api", "preferences", user_id, "table", TABLE_PREFERENCES_KEY]))
            .json(&body)
            .send()
            .await
            .map_err(map_err!(Remote))?;
        if !response.status().is_success() {
            return Err(error_for(response).await);
        }
        Ok(())
    }

    async fn pull(&self, user_id: &str, table_id: &str) -> CacheResult<Option<TablePreferences>> {
        let response = self
            .http
            .get(self.preference_url(user_id, table_id))
            .send()
            .await
            .map_err(map_err!(Remote))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let envelope: Envelope<StoredPreference> =
                    response.json().await.map_err(map_err!(Deserialize))?;
                envelope
                    .data
                    .map(|stored| serde_json::from_value(stored.value))
                    .transpose()
                    .map_err(map_err!(Deserialize))
            }
            _ => Err(error_for(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Impersonates the console API endpoints the client calls.
    async fn spawn_fake_console(stored: Arc<Mutex<Option<Value>>>) -> String {
        let put_store = stored.clone();
        let router = Router::new()
            .route(
                "/api/tables/{table}/field-mapping",
                get(|Path(table): Path<String>| async move {
                    if table != "contacts" {
                        return (AxumStatus::NOT_FOUND, Json(json!({"success": false}))).into_response();
                    }
                    Json(json!({
                        "tableId": "contacts",
                        "airtableTableId": "tblContacts",
                        "fieldKeyToId": {"Email": "fldA"},
                        "fieldIdToKey": {"fldA": "Email"},
                        "fields": [{"fieldId": "fldA", "fieldKey": "Email", "fieldName": "Email"}],
                        "lastUpdated": "2026-10-18T00:00:00Z"
                    }))
                    .into_response()
                }),
            )
            .route(
                "/api/preferences/{user}/{namespace}/{key}",
                get(move |Query(q): Query<HashMap<String, String>>| {
                    let stored = stored.clone();
                    async move {
                        assert_eq!(q.get("tableId").map(String::as_str), Some("contacts"));
                        match stored.lock().unwrap().clone() {
                            Some(value) => Json(json!({
                                "success": true,
                                "data": {"type": "json", "value": value}
                            }))
                            .into_response(),
                            None => (AxumStatus::NOT_FOUND, Json(json!({"success": false})))
                                .into_response(),
                        }
                    }
                })
                .put(move |Json(body): Json<Value>| {
                    let stored = put_store.clone();
                    async move {
                        assert_eq!(body["type"], json!("json"));
                        assert_eq!(body["tableId"], json!("contacts"));
                        *stored.lock().unwrap() = Some(body["value"].clone());
                        Json(json!({"success": true}))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn http_fetcher_reads_mapping_and_404() {
        let base = spawn_fake_console(Arc::new(Mutex::new(None))).await;
        let client = ConsoleClient::new(&base, Duration::from_secs(5)).unwrap();

        let mapping = client.fetch_mapping("contacts").await.unwrap().unwrap();
        assert_eq!(mapping.field_id("Email"), Some("fldA"));
        assert!(client.fetch_mapping("users").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn http_sync_push_then_pull() {
        let base = spawn_fake_console(Arc::new(Mutex::new(None))).await;
        let client = ConsoleClient::new(&base, Duration::from_secs(5)).unwrap();

        assert!(client.pull("u1", "contacts").await.unwrap().is_none());

        let prefs = TablePreferences {
            column_order: vec!["fldA".into()],
            using_field_ids: true,
            ..TablePreferences::default()
        };
        client.push("u1", "contacts", &prefs).await.unwrap();
        assert_eq!(client.pull("u1", "contacts").await.unwrap(), Some(prefs));
    }

    #[tokio::test]
    async fn store_sync_round_trips_through_preferences() {
        let store = PreferenceStore::in_memory();
        let prefs = TablePreferences {
            page_size: Some(25),
            ..TablePreferences::default()
        };
        store.push("u1", "contacts", &prefs).await.unwrap();

        let record = store
            .get(&table_identity("u1", "contacts"), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.unique_key, "u1::table::contacts::::tablePreferences");
        assert_eq!(store.pull("u1", "contacts").await.unwrap(), Some(prefs));
        assert!(store.pull("u2", "contacts").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolver_fetcher_bypasses_schema_cache() {
        use esg_airtable::{FieldSchema, MemorySchemaSource, TableSchema};
        use esg_core::config::TableRegistryEntry;
        use esg_fieldmap::TableRegistry;
        use std::collections::BTreeMap;

        let table = |name: &str| TableSchema {
            id: "tblContacts".into(),
            name: "Contacts".into(),
            primary_field_id: None,
            fields: vec![FieldSchema {
                id: "fldA".into(),
                name: name.into(),
                field_type: None,
            }],
        };
        let source = MemorySchemaSource::new().with_base("app1", vec![table("Email")]);
        let mut entries = BTreeMap::new();
        entries.insert(
            "contacts".to_string(),
            TableRegistryEntry {
                airtable_table_id: Some("tblContacts".into()),
                ..TableRegistryEntry::default()
            },
        );
        let resolver = IdentityResolver::new(
            Arc::new(source.clone()),
            TableRegistry::new("app1", entries),
            Duration::from_secs(300),
        );

        let first = resolver.fetch_mapping("contacts").await.unwrap().unwrap();
        assert_eq!(first.field_id("Email"), Some("fldA"));

        source.set_base("app1", vec![table("E-mail")]);
        let second = resolver.fetch_mapping("contacts").await.unwrap().unwrap();
        assert_eq!(second.field_id("E-mail"), Some("fldA"));
        assert!(resolver.fetch_mapping("users").await.unwrap().is_none());
    }
}
