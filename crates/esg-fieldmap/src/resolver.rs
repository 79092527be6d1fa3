//! IdentityResolver — field key ↔ field ID mappings per logical table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use esg_airtable::{AirtableError, SchemaSource, TableSchema};
use esg_core::types::{FieldMappingRequest, TableFieldMapping};

use crate::error::{FieldMapError, FieldMapResult};
use crate::registry::{TableRegistry, assign_field_keys};

struct CachedSchema {
    tables: Vec<TableSchema>,
    fetched_at: Instant,
}

struct Inner {
    schema: Arc<dyn SchemaSource>,
    registry: TableRegistry,
    schema_ttl: Duration,
    /// Base ID → last schema listing.
    schema_cache: RwLock<HashMap<String, CachedSchema>>,
    /// Mappings registered through `create_or_update_field_mapping`.
    manual: RwLock<HashMap<String, TableFieldMapping>>,
}

/// Resolves logical table IDs to field mappings. Cheap to clone.
#[derive(Clone)]
pub struct IdentityResolver {
    inner: Arc<Inner>,
}

impl IdentityResolver {
    pub fn new(schema: Arc<dyn SchemaSource>, registry: TableRegistry, schema_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                registry,
                schema_ttl,
                schema_cache: RwLock::new(HashMap::new()),
                manual: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.inner.registry
    }

    /// Logical table IDs known to the static registry.
    pub fn registered_tables(&self) -> Vec<String> {
        self.inner.registry.table_ids()
    }

    /// Resolve the mapping for `table_id`, using cached schema listings.
    ///
    /// `Ok(None)` covers every "cannot map this table" outcome: no registry
    /// entry, missing permission on the base, or no matching table.
    pub async fn get_field_mapping(&self, table_id: &str) -> FieldMapResult<Option<TableFieldMapping>> {
        self.resolve(table_id, false).await
    }

    /// Like `get_field_mapping`, but always refetches the base's schema.
    pub async fn refresh_field_mapping(&self, table_id: &str) -> FieldMapResult<Option<TableFieldMapping>> {
        self.resolve(table_id, true).await
    }

    async fn resolve(&self, table_id: &str, refresh: bool) -> FieldMapResult<Option<TableFieldMapping>> {
        if let Some(mapping) = self.inner.manual.read().await.get(table_id) {
            debug!(%table_id, "using registered field mapping");
            return Ok(Some(mapping.clone()));
        }

        let Some(entry) = self.inner.registry.get(table_id) else {
            warn!(%table_id, "no registry entry for table, field mapping unavailable");
            return Ok(None);
        };
        let base_id = self.inner.registry.base_for(entry).to_string();

        let tables = match self.schema_for(&base_id, refresh).await {
            Ok(tables) => tables,
            Err(e) if e.is_auth() => {
                warn!(
                    %table_id,
                    %base_id,
                    error = %e,
                    "no permission to read base schema; check the token's schema.bases:read scope"
                );
                return Ok(None);
            }
            Err(AirtableError::NotFound(detail)) => {
                warn!(%table_id, %base_id, %detail, "base not found while fetching schema");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let Some(table) = TableSchema::find(
            &tables,
            entry.airtable_table_id.as_deref(),
            entry.airtable_table_name.as_deref(),
        ) else {
            let available: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
            warn!(
                %table_id,
                %base_id,
                wanted_id = ?entry.airtable_table_id,
                wanted_name = ?entry.airtable_table_name,
                ?available,
                "table not found in base schema"
            );
            return Ok(None);
        };

        let fields = assign_field_keys(entry, table);
        debug!(%table_id, airtable_table_id = %table.id, fields = fields.len(), "field mapping resolved");
        Ok(Some(TableFieldMapping::new(
            table_id,
            table.id.clone(),
            Some(base_id),
            fields,
            Utc::now(),
        )))
    }

    /// The schema listing of `base_id`, from cache while within the TTL.
    async fn schema_for(&self, base_id: &str, refresh: bool) -> Result<Vec<TableSchema>, AirtableError> {
        if !refresh {
            let cache = self.inner.schema_cache.read().await;
            if let Some(cached) = cache.get(base_id) {
                if cached.fetched_at.elapsed() < self.inner.schema_ttl {
                    return Ok(cached.tables.clone());
                }
            }
        }

        let tables = self.inner.schema.list_tables(base_id).await?;
        debug!(%base_id, tables = tables.len(), "base schema fetched");
        self.inner.schema_cache.write().await.insert(
            base_id.to_string(),
            CachedSchema {
                tables: tables.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(tables)
    }

    /// Register a mapping built from caller-supplied fields, without network access.
    ///
    /// Registered mappings take precedence over the registry for `table_id`.
    pub async fn create_or_update_field_mapping(
        &self,
        table_id: &str,
        request: FieldMappingRequest,
    ) -> FieldMapResult<TableFieldMapping> {
        if table_id.trim().is_empty() {
            return Err(FieldMapError::Validation("tableId is required".into()));
        }
        for field in &request.fields {
            if field.field_id.trim().is_empty() || field.field_key.trim().is_empty() {
                return Err(FieldMapError::Validation(
                    "every field needs a fieldId and a fieldKey".into(),
                ));
            }
        }

        let entry = self.inner.registry.get(table_id);
        let airtable_table_id = request
            .airtable_table_id
            .filter(|id| !id.is_empty())
            .or_else(|| entry.and_then(|e| e.airtable_table_id.clone()))
            .unwrap_or_else(|| table_id.to_string());
        let base_id = request
            .base_id
            .filter(|id| !id.is_empty())
            .or_else(|| entry.map(|e| self.inner.registry.base_for(e).to_string()));

        let mapping = TableFieldMapping::new(
            table_id,
            airtable_table_id,
            base_id,
            request.fields,
            Utc::now(),
        );
        self.inner
            .manual
            .write()
            .await
            .insert(table_id.to_string(), mapping.clone());
        info!(%table_id, fields = mapping.fields.len(), "field mapping registered");
        Ok(mapping)
    }
}
