//! Record CRUD over a backing-store table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AirtableResult;

/// Column name → cell value. Absent columns are empty cells.
pub type Fields = serde_json::Map<String, Value>;

/// One row as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    pub fn text(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(Value::as_str)
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.fields.get(column).and_then(Value::as_f64)
    }

    pub fn boolean(&self, column: &str) -> Option<bool> {
        self.fields.get(column).and_then(Value::as_bool)
    }
}

/// Row predicate, rendered to an Airtable formula for the REST client and
/// evaluated directly by the in-memory store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Column equals a scalar value.
    Eq(String, Value),
    /// All sub-filters hold. An empty list matches everything.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    /// Render as an Airtable `filterByFormula` expression.
    pub fn to_formula(&self) -> String {
        match self {
            Filter::Eq(column, value) => {
                format!("{} = {}", column_ref(column), formula_literal(value))
            }
            Filter::And(parts) if parts.is_empty() => "TRUE()".to_string(),
            Filter::And(parts) if parts.len() == 1 => parts[0].to_formula(),
            Filter::And(parts) => {
                let inner: Vec<String> = parts.iter().map(Filter::to_formula).collect();
                format!("AND({})", inner.join(", "))
            }
        }
    }

    /// Evaluate against a row's fields.
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Filter::Eq(column, value) => fields.get(column) == Some(value),
            Filter::And(parts) => parts.iter().all(|p| p.matches(fields)),
        }
    }
}

fn column_ref(column: &str) -> String {
    format!("{{{}}}", column.replace('}', "\\}"))
}

fn formula_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Bool(true) => "TRUE()".to_string(),
        Value::Bool(false) => "FALSE()".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "BLANK()".to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "\\'")),
    }
}

/// Row-level access to backing-store tables.
///
/// Updates are partial: columns absent from `fields` are left alone and
/// columns set to `null` are cleared.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All rows of `table` matching `filter` (every row when `None`).
    async fn list_records(&self, table: &str, filter: Option<&Filter>)
    -> AirtableResult<Vec<Record>>;

    async fn create_record(&self, table: &str, fields: Fields) -> AirtableResult<Record>;

    async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        fields: Fields,
    ) -> AirtableResult<Record>;

    /// Delete rows by ID. Returns how many were actually removed.
    async fn delete_records(&self, table: &str, record_ids: &[String]) -> AirtableResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn formula_for_single_equality() {
        let f = Filter::eq("Unique Key", "u1::table::companies::::columnWidths");
        assert_eq!(
            f.to_formula(),
            "{Unique Key} = 'u1::table::companies::::columnWidths'"
        );
    }

    #[test]
    fn formula_escapes_quotes() {
        let f = Filter::eq("Key", "it's");
        assert_eq!(f.to_formula(), "{Key} = 'it\\'s'");
    }

    #[test]
    fn formula_for_conjunction() {
        let f = Filter::And(vec![
            Filter::eq("User Id", "u1"),
            Filter::eq("Boolean Value", true),
            Filter::eq("Namespace", "table"),
        ]);
        assert_eq!(
            f.to_formula(),
            "AND({User Id} = 'u1', {Boolean Value} = TRUE(), {Namespace} = 'table')"
        );
        assert_eq!(Filter::And(vec![]).to_formula(), "TRUE()");
    }

    #[test]
    fn matches_evaluates_equality() {
        let row = fields(json!({"User Id": "u1", "Namespace": "table", "Scope Id": ""}));

        assert!(Filter::eq("User Id", "u1").matches(&row));
        assert!(!Filter::eq("User Id", "u2").matches(&row));
        assert!(!Filter::eq("Table Id", "companies").matches(&row));
        assert!(
            Filter::And(vec![Filter::eq("User Id", "u1"), Filter::eq("Namespace", "table")])
                .matches(&row)
        );
        assert!(Filter::And(vec![]).matches(&row));
    }

    #[test]
    fn record_accessors() {
        let record = Record {
            id: "rec1".into(),
            created_time: None,
            fields: fields(json!({"Text Value": "a", "Number Value": 2.5, "Boolean Value": true})),
        };
        assert_eq!(record.text("Text Value"), Some("a"));
        assert_eq!(record.number("Number Value"), Some(2.5));
        assert_eq!(record.boolean("Boolean Value"), Some(true));
        assert_eq!(record.text("Missing"), None);
    }
}
