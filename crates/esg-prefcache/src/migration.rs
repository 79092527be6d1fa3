//! Table preference blobs and their field-name ↔ field-ID translation.
//!
//! Preferences are saved in terms of field IDs whenever a mapping is known,
//! so a column rename in the backing store cannot orphan them. Only
//! `columnVisibility`, `columnOrder` and `defaultSort.field` are translated;
//! computed fields (which have no stored column) keep their names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use esg_core::types::TableFieldMapping;

/// Identifier space of the keys in a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpace {
    /// Keys are field names (Unmapped).
    FieldNames,
    /// Keys are field IDs (Mapped).
    FieldIds,
}

/// The key space a save should persist in.
pub fn transition(current: KeySpace, mapping_available: bool) -> KeySpace {
    match (current, mapping_available) {
        (_, true) => KeySpace::FieldIds,
        // Without a mapping nothing can be translated, so names are kept.
        (KeySpace::FieldNames, false) | (KeySpace::FieldIds, false) => KeySpace::FieldNames,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// A table view's persisted preferences for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePreferences {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_visibility: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_order: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_widths: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_widths_by_mode: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_sort: Option<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(rename = "_usingFieldIds", default)]
    pub using_field_ids: bool,
    /// Properties this version does not know about, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TablePreferences {
    pub fn key_space(&self) -> KeySpace {
        if self.using_field_ids {
            KeySpace::FieldIds
        } else {
            KeySpace::FieldNames
        }
    }
}

const COMPUTED_FIELDS: &[&str] = &["id", "createdAt", "updatedAt", "createdBy", "lastModifiedBy"];

/// Fields derived by the application rather than stored as columns.
pub fn is_computed_field(key: &str) -> bool {
    key.ends_with("Name") || COMPUTED_FIELDS.contains(&key)
}

fn rewrite_keys(prefs: &TablePreferences, translate: impl Fn(&str) -> String) -> TablePreferences {
    let mut out = prefs.clone();
    out.column_visibility = prefs
        .column_visibility
        .iter()
        .map(|(key, visible)| (translate(key), *visible))
        .collect();
    out.column_order = prefs.column_order.iter().map(|key| translate(key)).collect();
    if let Some(sort) = out.default_sort.as_mut() {
        sort.field = translate(&sort.field);
    }
    out
}

/// Translate field names to field IDs. Unknown and computed fields pass through.
pub fn convert_preferences_to_field_ids(
    prefs: &TablePreferences,
    mapping: &TableFieldMapping,
) -> TablePreferences {
    let mut out = rewrite_keys(prefs, |key| {
        if is_computed_field(key) {
            return key.to_string();
        }
        mapping.field_id(key).unwrap_or(key).to_string()
    });
    out.using_field_ids = true;
    out
}

/// Translate field IDs back to field keys. IDs without a reverse entry are kept raw.
pub fn convert_preferences_from_field_ids(
    prefs: &TablePreferences,
    mapping: &TableFieldMapping,
) -> TablePreferences {
    let mut out = rewrite_keys(prefs, |key| mapping.field_key(key).unwrap_or(key).to_string());
    out.using_field_ids = false;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use esg_core::types::FieldIdMapping;
    use serde_json::json;

    fn mapping() -> TableFieldMapping {
        let field = |id: &str, key: &str| FieldIdMapping {
            field_id: id.into(),
            field_key: key.into(),
            field_name: key.into(),
            field_type: None,
        };
        TableFieldMapping::new(
            "contacts",
            "tblContacts",
            None,
            vec![field("fldA", "Email"), field("fldB", "Phone"), field("fldC", "Company Name")],
            Utc::now(),
        )
    }

    #[test]
    fn transition_follows_mapping_availability() {
        assert_eq!(transition(KeySpace::FieldNames, true), KeySpace::FieldIds);
        assert_eq!(transition(KeySpace::FieldIds, true), KeySpace::FieldIds);
        assert_eq!(transition(KeySpace::FieldNames, false), KeySpace::FieldNames);
        assert_eq!(transition(KeySpace::FieldIds, false), KeySpace::FieldNames);
    }

    #[test]
    fn computed_fields() {
        for key in ["id", "createdAt", "updatedAt", "createdBy", "lastModifiedBy", "Company Name"] {
            assert!(is_computed_field(key), "{key}");
        }
        assert!(!is_computed_field("Email"));
        assert!(!is_computed_field("name"));
    }

    #[test]
    fn column_order_uses_ids_for_mapped_fields() {
        let prefs = TablePreferences {
            column_order: vec!["Email".into(), "First Name".into()],
            ..TablePreferences::default()
        };
        let stored = convert_preferences_to_field_ids(&prefs, &mapping());
        assert_eq!(stored.column_order, ["fldA", "First Name"]);
        assert!(stored.using_field_ids);
    }

    #[test]
    fn round_trip_restores_keys() {
        let mut visibility = BTreeMap::new();
        visibility.insert("Email".to_string(), false);
        visibility.insert("Phone".to_string(), true);
        visibility.insert("createdAt".to_string(), true);
        let prefs = TablePreferences {
            column_visibility: visibility,
            column_order: vec!["Phone".into(), "Email".into(), "Company Name".into(), "Legacy".into()],
            default_sort: Some(SortSpec {
                field: "Email".into(),
                direction: SortDirection::Desc,
            }),
            page_size: Some(50),
            ..TablePreferences::default()
        };

        let stored = convert_preferences_to_field_ids(&prefs, &mapping());
        assert_eq!(stored.column_visibility.get("fldA"), Some(&false));
        assert_eq!(stored.column_visibility.get("createdAt"), Some(&true));
        // Computed fields keep their name even when the mapping knows them.
        assert!(stored.column_order.contains(&"Company Name".to_string()));
        assert_eq!(stored.default_sort.as_ref().unwrap().field, "fldA");

        let restored = convert_preferences_from_field_ids(&stored, &mapping());
        assert_eq!(restored, prefs);
    }

    #[test]
    fn unknown_ids_stay_raw() {
        let prefs = TablePreferences {
            column_order: vec!["fldGone".into(), "fldB".into()],
            using_field_ids: true,
            ..TablePreferences::default()
        };
        let restored = convert_preferences_from_field_ids(&prefs, &mapping());
        assert_eq!(restored.column_order, ["fldGone", "Phone"]);
        assert!(!restored.using_field_ids);
    }

    #[test]
    fn widths_and_extras_are_preserved() {
        let blob = json!({
            "columnWidths": {"Email": 180.0},
            "columnOrder": ["Email"],
            "listMode": "compact",
            "pinnedRows": ["rec1"],
            "_usingFieldIds": false
        });
        let prefs: TablePreferences = serde_json::from_value(blob).unwrap();
        assert_eq!(prefs.extra.get("pinnedRows"), Some(&json!(["rec1"])));

        let stored = convert_preferences_to_field_ids(&prefs, &mapping());
        assert_eq!(stored.column_widths.get("Email"), Some(&180.0));

        let out = serde_json::to_value(&stored).unwrap();
        assert_eq!(out["_usingFieldIds"], json!(true));
        assert_eq!(out["pinnedRows"], json!(["rec1"]));
        assert_eq!(out["columnOrder"], json!(["fldA"]));
    }
}
