//! Schema introspection (the Meta API's table listing).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AirtableResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_field_id: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

impl TableSchema {
    /// Find a table by store ID, falling back to a case-insensitive name match.
    pub fn find<'a>(
        tables: &'a [TableSchema],
        table_id: Option<&str>,
        table_name: Option<&str>,
    ) -> Option<&'a TableSchema> {
        if let Some(id) = table_id {
            if let Some(table) = tables.iter().find(|t| t.id == id) {
                return Some(table);
            }
        }
        let name = table_name?.to_lowercase();
        tables.iter().find(|t| t.name.to_lowercase() == name)
    }
}

/// Lists the tables of a base with their fields and field IDs.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn list_tables(&self, base_id: &str) -> AirtableResult<Vec<TableSchema>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(id: &str, name: &str) -> TableSchema {
        TableSchema {
            id: id.to_string(),
            name: name.to_string(),
            primary_field_id: None,
            fields: vec![],
        }
    }

    #[test]
    fn find_prefers_id() {
        let tables = vec![table("tbl1", "Company"), table("tbl2", "company")];
        let found = TableSchema::find(&tables, Some("tbl2"), Some("Company")).unwrap();
        assert_eq!(found.id, "tbl2");
    }

    #[test]
    fn find_falls_back_to_case_insensitive_name() {
        let tables = vec![table("tbl1", "Unit Conversion")];
        let found = TableSchema::find(&tables, Some("tblGone"), Some("unit conversion")).unwrap();
        assert_eq!(found.id, "tbl1");
        assert!(TableSchema::find(&tables, None, Some("Scope")).is_none());
        assert!(TableSchema::find(&tables, None, None).is_none());
    }

    #[test]
    fn decodes_meta_api_payload() {
        let payload = r#"{
            "id": "tbl82H6ezrakMSkV1",
            "name": "Company",
            "primaryFieldId": "fldPrimary",
            "fields": [
                {"id": "fldPrimary", "name": "Name", "type": "singleLineText"},
                {"id": "fldSector", "name": "Sector", "type": "singleSelect", "options": {}}
            ]
        }"#;
        let table: TableSchema = serde_json::from_str(payload).unwrap();
        assert_eq!(table.primary_field_id.as_deref(), Some("fldPrimary"));
        assert_eq!(table.fields.len(), 2);
        assert_eq!(table.fields[1].field_type.as_deref(), Some("singleSelect"));
    }
}
