//! Column layout of the preferences table and the row codec.
//!
//! Each preference is one row. Identity columns are plain text; the typed
//! payload occupies exactly one of `Text Value`, `Number Value` or
//! `Boolean Value`; timestamps are ISO-8601 strings with millisecond
//! precision.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use esg_airtable::{Fields, Record};

use crate::error::PrefError;
use crate::types::*;

pub const USER_ID: &str = "User Id";
pub const NAMESPACE: &str = "Namespace";
pub const KEY: &str = "Key";
pub const TABLE_ID: &str = "Table Id";
pub const SCOPE_ID: &str = "Scope Id";
pub const TYPE: &str = "Type";
pub const TEXT_VALUE: &str = "Text Value";
pub const NUMBER_VALUE: &str = "Number Value";
pub const BOOLEAN_VALUE: &str = "Boolean Value";
pub const VISIBILITY: &str = "Visibility";
pub const EXPIRES_AT: &str = "Expires At";
/// Composite identity; every lookup filters on this column.
pub const UNIQUE_KEY: &str = "Unique Key";
pub const CHECKSUM: &str = "Checksum";
pub const CREATED_AT: &str = "Created At";
pub const UPDATED_AT: &str = "Updated At";

/// Everything written for one `set`.
pub(crate) struct RowWrite<'a> {
    pub identity: &'a PreferenceIdentity,
    pub value: &'a PreferenceValue,
    pub visibility: Visibility,
    pub expires_at: Option<DateTime<Utc>>,
    pub checksum: &'a str,
    /// Only set on create; updates leave the column alone.
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |v| Value::String(v.to_string()))
}

/// Encode a row. Empty slots are sent as `null` so an update clears them.
pub(crate) fn encode_row(row: &RowWrite<'_>) -> Fields {
    let slots = row.value.to_slots();
    let mut fields = Fields::new();
    fields.insert(USER_ID.into(), row.identity.user_id.clone().into());
    fields.insert(NAMESPACE.into(), row.identity.namespace.as_str().into());
    fields.insert(KEY.into(), row.identity.key.clone().into());
    fields.insert(TABLE_ID.into(), opt_text(row.identity.table_id.as_deref()));
    fields.insert(SCOPE_ID.into(), opt_text(row.identity.scope_id.as_deref()));
    fields.insert(TYPE.into(), row.value.value_type().as_str().into());
    fields.insert(TEXT_VALUE.into(), slots.text.map_or(Value::Null, Value::String));
    fields.insert(
        NUMBER_VALUE.into(),
        slots
            .number
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),
    );
    fields.insert(BOOLEAN_VALUE.into(), slots.boolean.map_or(Value::Null, Value::Bool));
    fields.insert(VISIBILITY.into(), row.visibility.as_str().into());
    fields.insert(
        EXPIRES_AT.into(),
        opt_text(row.expires_at.map(format_timestamp).as_deref()),
    );
    fields.insert(UNIQUE_KEY.into(), row.identity.unique_key().into());
    fields.insert(CHECKSUM.into(), row.checksum.into());
    if let Some(created_at) = row.created_at {
        fields.insert(CREATED_AT.into(), format_timestamp(created_at).into());
    }
    fields.insert(UPDATED_AT.into(), format_timestamp(row.updated_at).into());
    fields
}

/// Decode a stored row into a `PreferenceRecord`.
pub(crate) fn decode_row(record: &Record) -> Result<PreferenceRecord, PrefError> {
    let corrupt = |reason: String| PrefError::Corrupt {
        id: record.id.clone(),
        reason,
    };
    let required = |column: &str| {
        record
            .text(column)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| corrupt(format!("missing {column}")))
    };

    let user_id = required(USER_ID)?;
    let key = required(KEY)?;
    let namespace: Namespace = required(NAMESPACE)?
        .parse()
        .map_err(|e: PrefError| corrupt(e.to_string()))?;
    let value_type: PreferenceType = required(TYPE)?
        .parse()
        .map_err(|e: PrefError| corrupt(e.to_string()))?;
    let visibility = match record.text(VISIBILITY) {
        Some(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e: PrefError| corrupt(e.to_string()))?,
        _ => Visibility::default(),
    };

    let slots = Slots {
        text: record.text(TEXT_VALUE).map(str::to_string),
        number: record.number(NUMBER_VALUE),
        boolean: record.boolean(BOOLEAN_VALUE),
    };
    let value = PreferenceValue::from_slots(value_type, slots).map_err(corrupt)?;

    let identity = PreferenceIdentity::new(user_id, namespace, key)
        .with_table(record.text(TABLE_ID).map(str::to_string))
        .with_scope(record.text(SCOPE_ID).map(str::to_string));
    let unique_key = record
        .text(UNIQUE_KEY)
        .map(str::to_string)
        .unwrap_or_else(|| identity.unique_key());
    let checksum = record
        .text(CHECKSUM)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| value.checksum());
    let created_at = record
        .text(CREATED_AT)
        .or(record.created_time.as_deref())
        .and_then(parse_timestamp);

    Ok(PreferenceRecord {
        id: record.id.clone(),
        user_id: identity.user_id,
        namespace: identity.namespace,
        key: identity.key,
        table_id: identity.table_id,
        scope_id: identity.scope_id,
        value,
        visibility,
        expires_at: record.text(EXPIRES_AT).and_then(parse_timestamp),
        unique_key,
        checksum,
        created_at,
        updated_at: record.text(UPDATED_AT).and_then(parse_timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn encode_then_decode_preserves_record() {
        let identity = PreferenceIdentity::new("u1", Namespace::Table, "columnWidths")
            .with_table(Some("companies".into()));
        let value = PreferenceValue::Json(json!({"name": 200}));
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap();
        let checksum = value.checksum();
        let fields = encode_row(&RowWrite {
            identity: &identity,
            value: &value,
            visibility: Visibility::Org,
            expires_at: Some(now + chrono::Duration::hours(1)),
            checksum: &checksum,
            created_at: Some(now),
            updated_at: now,
        });

        assert_eq!(fields[TEXT_VALUE], json!("{\"name\":200}"));
        assert_eq!(fields[NUMBER_VALUE], Value::Null);
        assert_eq!(fields[SCOPE_ID], Value::Null);
        assert_eq!(fields[EXPIRES_AT], json!("2026-10-18T10:30:00.000Z"));

        let record = Record {
            id: "rec1".into(),
            created_time: None,
            fields,
        };
        let decoded = decode_row(&record).unwrap();
        assert_eq!(decoded.identity(), identity);
        assert_eq!(decoded.value, value);
        assert_eq!(decoded.visibility, Visibility::Org);
        assert_eq!(decoded.unique_key, "u1::table::companies::::columnWidths");
        assert_eq!(decoded.checksum, checksum);
        assert_eq!(decoded.created_at, Some(now));
        assert_eq!(decoded.updated_at, Some(now));
    }

    #[test]
    fn update_rows_omit_created_at() {
        let identity = PreferenceIdentity::new("u1", Namespace::Ui, "density");
        let value = PreferenceValue::String("compact".into());
        let fields = encode_row(&RowWrite {
            identity: &identity,
            value: &value,
            visibility: Visibility::Private,
            expires_at: None,
            checksum: "x",
            created_at: None,
            updated_at: Utc::now(),
        });
        assert!(!fields.contains_key(CREATED_AT));
        assert_eq!(fields[EXPIRES_AT], Value::Null);
    }

    #[test]
    fn decode_reports_corrupt_rows() {
        let mut fields = Fields::new();
        fields.insert(USER_ID.into(), "u1".into());
        fields.insert(KEY.into(), "k".into());
        fields.insert(NAMESPACE.into(), "nowhere".into());
        fields.insert(TYPE.into(), "string".into());
        let record = Record {
            id: "recBad".into(),
            created_time: None,
            fields,
        };
        let err = decode_row(&record).unwrap_err();
        assert!(matches!(err, PrefError::Corrupt { ref id, .. } if id == "recBad"));
    }

    #[test]
    fn decode_falls_back_to_store_created_time_and_computed_checksum() {
        let mut fields = Fields::new();
        fields.insert(USER_ID.into(), "u1".into());
        fields.insert(KEY.into(), "beta".into());
        fields.insert(NAMESPACE.into(), "featureFlags".into());
        fields.insert(TYPE.into(), "boolean".into());
        let record = Record {
            id: "rec2".into(),
            created_time: Some("2026-01-01T00:00:00.000Z".into()),
            fields,
        };
        let decoded = decode_row(&record).unwrap();
        assert_eq!(decoded.value, PreferenceValue::Boolean(false));
        assert_eq!(decoded.checksum, PreferenceValue::Boolean(false).checksum());
        assert_eq!(decoded.unique_key, "u1::featureFlags::::::beta");
        assert!(decoded.created_at.is_some());
        assert_eq!(decoded.visibility, Visibility::Private);
    }
}
