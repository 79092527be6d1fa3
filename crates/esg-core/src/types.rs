//! Shared types used across the ESG console crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One column's dual identity in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldIdMapping {
    /// Immutable, store-assigned field ID (e.g. `fldXXXXXXXXXXXXXX`).
    pub field_id: String,
    /// Name the application's business logic uses.
    pub field_key: String,
    /// The store's current display name; differs from `field_key` after a rename.
    pub field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

/// Field identities of one logical table, indexed both ways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableFieldMapping {
    pub table_id: String,
    pub airtable_table_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_id: Option<String>,
    pub field_key_to_id: BTreeMap<String, String>,
    pub field_id_to_key: BTreeMap<String, String>,
    pub fields: Vec<FieldIdMapping>,
    pub last_updated: DateTime<Utc>,
}

impl TableFieldMapping {
    /// Build a mapping and both lookup indexes from a field list.
    ///
    /// When two fields claim the same key the first one wins the
    /// key → ID direction; the ID → key direction is always complete.
    pub fn new(
        table_id: impl Into<String>,
        airtable_table_id: impl Into<String>,
        base_id: Option<String>,
        fields: Vec<FieldIdMapping>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let mut field_key_to_id = BTreeMap::new();
        let mut field_id_to_key = BTreeMap::new();
        for field in &fields {
            field_key_to_id
                .entry(field.field_key.clone())
                .or_insert_with(|| field.field_id.clone());
            field_id_to_key.insert(field.field_id.clone(), field.field_key.clone());
        }
        Self {
            table_id: table_id.into(),
            airtable_table_id: airtable_table_id.into(),
            base_id,
            field_key_to_id,
            field_id_to_key,
            fields,
            last_updated,
        }
    }

    pub fn field_id(&self, field_key: &str) -> Option<&str> {
        self.field_key_to_id.get(field_key).map(String::as_str)
    }

    pub fn field_key(&self, field_id: &str) -> Option<&str> {
        self.field_id_to_key.get(field_id).map(String::as_str)
    }

    /// True when `last_updated` is older than `max_age` at `now`.
    pub fn is_older_than(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.last_updated > max_age
    }
}

/// Caller-supplied mapping for tables outside the static registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappingRequest {
    pub base_id: Option<String>,
    pub airtable_table_id: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldIdMapping>,
}
