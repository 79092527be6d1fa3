//! Static registry of logical tables and their backing-store locations.

use std::collections::BTreeMap;

use esg_airtable::TableSchema;
use esg_core::config::{ConsoleConfig, TableRegistryEntry};
use esg_core::types::FieldIdMapping;

/// Logical table ID → where the table lives in the backing store.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    default_base_id: String,
    entries: BTreeMap<String, TableRegistryEntry>,
}

impl TableRegistry {
    pub fn new(
        default_base_id: impl Into<String>,
        entries: BTreeMap<String, TableRegistryEntry>,
    ) -> Self {
        Self {
            default_base_id: default_base_id.into(),
            entries,
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(config.airtable.base_id.clone(), config.tables.clone())
    }

    pub fn get(&self, table_id: &str) -> Option<&TableRegistryEntry> {
        self.entries.get(table_id)
    }

    /// The entry's own base, or the console's default base.
    pub fn base_for<'a>(&'a self, entry: &'a TableRegistryEntry) -> &'a str {
        entry
            .base_id
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(&self.default_base_id)
    }

    pub fn default_base_id(&self) -> &str {
        &self.default_base_id
    }

    pub fn table_ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Give every field of `table` its application-facing key.
///
/// Overrides in `entry.field_keys` are looked up by field ID first, then by
/// the current field name; without an override the key is the field name.
pub fn assign_field_keys(entry: &TableRegistryEntry, table: &TableSchema) -> Vec<FieldIdMapping> {
    table
        .fields
        .iter()
        .map(|field| {
            let field_key = entry
                .field_keys
                .get(&field.id)
                .or_else(|| entry.field_keys.get(&field.name))
                .cloned()
                .unwrap_or_else(|| field.name.clone());
            FieldIdMapping {
                field_id: field.id.clone(),
                field_key,
                field_name: field.name.clone(),
                field_type: field.field_type.clone(),
            }
        })
        .collect()
}
