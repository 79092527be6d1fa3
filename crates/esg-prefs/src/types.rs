//! Domain types for the preference store.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{PrefError, PrefResult};

/// Separator between the components of a unique key.
pub const KEY_SEPARATOR: &str = "::";

/// Separator between hashed slots in a checksum.
const SLOT_SEPARATOR: &[u8] = b"\x1f";

/// Generates `as_str`, `Display` and `FromStr` for a unit enum with fixed wire names.
macro_rules! wire_enum {
    ($name:ident, $what:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = PrefError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(PrefError::validation(format!(
                        concat!("unknown ", $what, " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

// ── Enumerations ───────────────────────────────────────────────────

/// Top-level partition of the preference keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Namespace {
    Ui,
    Table,
    Filters,
    FeatureFlags,
    Misc,
}

wire_enum!(Namespace, "namespace", {
    Ui => "ui",
    Table => "table",
    Filters => "filters",
    FeatureFlags => "featureFlags",
    Misc => "misc",
});

/// Intended sharing level. Recorded, not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Org,
    Global,
}

wire_enum!(Visibility, "visibility", {
    Private => "private",
    Org => "org",
    Global => "global",
});

/// Declared type of a preference payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceType {
    String,
    Number,
    Boolean,
    Json,
}

wire_enum!(PreferenceType, "preference type", {
    String => "string",
    Number => "number",
    Boolean => "boolean",
    Json => "json",
});

// ── Values ─────────────────────────────────────────────────────────

/// A typed preference payload. Exactly one storage slot is ever populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PreferenceValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Json(Value),
}

/// The three storage slots of a preference row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Slots {
    pub text: Option<String>,
    pub number: Option<f64>,
    pub boolean: Option<bool>,
}

impl PreferenceValue {
    /// Check a loosely-typed value against its declared type.
    ///
    /// `json` accepts objects and arrays; scalars must use their own type.
    pub fn from_typed(value_type: PreferenceType, value: Value) -> PrefResult<Self> {
        let mismatch = |value: &Value| {
            PrefError::validation(format!(
                "value {value} does not match declared type '{value_type}'"
            ))
        };
        match (value_type, value) {
            (PreferenceType::String, Value::String(s)) => Ok(PreferenceValue::String(s)),
            (PreferenceType::Number, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(PreferenceValue::Number)
                .ok_or_else(|| PrefError::validation(format!("number {n} is not representable"))),
            (PreferenceType::Boolean, Value::Bool(b)) => Ok(PreferenceValue::Boolean(b)),
            (PreferenceType::Json, v @ (Value::Object(_) | Value::Array(_))) => {
                Ok(PreferenceValue::Json(v))
            }
            (_, other) => Err(mismatch(&other)),
        }
    }

    pub fn value_type(&self) -> PreferenceType {
        match self {
            PreferenceValue::String(_) => PreferenceType::String,
            PreferenceValue::Number(_) => PreferenceType::Number,
            PreferenceValue::Boolean(_) => PreferenceType::Boolean,
            PreferenceValue::Json(_) => PreferenceType::Json,
        }
    }

    /// The payload as plain JSON.
    pub fn to_json(&self) -> Value {
        match self {
            PreferenceValue::String(s) => Value::String(s.clone()),
            PreferenceValue::Number(n) => {
                serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number)
            }
            PreferenceValue::Boolean(b) => Value::Bool(*b),
            PreferenceValue::Json(v) => v.clone(),
        }
    }

    pub(crate) fn validate(&self) -> PrefResult<()> {
        match self {
            PreferenceValue::Number(n) if !n.is_finite() => {
                Err(PrefError::validation(format!("number {n} is not finite")))
            }
            PreferenceValue::Json(v) if !(v.is_object() || v.is_array()) => Err(
                PrefError::validation("json preferences must be an object or an array"),
            ),
            _ => Ok(()),
        }
    }

    /// Split into storage slots; `json` is serialized into the text slot.
    pub fn to_slots(&self) -> Slots {
        match self {
            PreferenceValue::String(s) => Slots {
                text: Some(s.clone()),
                ..Slots::default()
            },
            PreferenceValue::Number(n) => Slots {
                number: Some(*n),
                ..Slots::default()
            },
            PreferenceValue::Boolean(b) => Slots {
                boolean: Some(*b),
                ..Slots::default()
            },
            PreferenceValue::Json(v) => Slots {
                text: Some(v.to_string()),
                ..Slots::default()
            },
        }
    }

    /// Rebuild from storage slots.
    ///
    /// The store drops empty text and unchecked boolean cells, so a missing
    /// string slot reads as `""` and a missing boolean slot as `false`.
    pub fn from_slots(value_type: PreferenceType, slots: Slots) -> Result<Self, String> {
        match value_type {
            PreferenceType::String => Ok(PreferenceValue::String(slots.text.unwrap_or_default())),
            PreferenceType::Number => slots
                .number
                .map(PreferenceValue::Number)
                .ok_or_else(|| "number slot is empty".to_string()),
            PreferenceType::Boolean => Ok(PreferenceValue::Boolean(slots.boolean.unwrap_or(false))),
            PreferenceType::Json => {
                let text = slots.text.ok_or_else(|| "json slot is empty".to_string())?;
                serde_json::from_str(&text)
                    .map(PreferenceValue::Json)
                    .map_err(|e| format!("json slot does not parse: {e}"))
            }
        }
    }

    /// Hex SHA-256 over `(type, text, number, boolean)`.
    pub fn checksum(&self) -> String {
        let slots = self.to_slots();
        let mut hasher = Sha256::new();
        hasher.update(self.value_type().as_str().as_bytes());
        hasher.update(SLOT_SEPARATOR);
        hasher.update(slots.text.unwrap_or_default().as_bytes());
        hasher.update(SLOT_SEPARATOR);
        hasher.update(slots.number.map(|n| n.to_string()).unwrap_or_default().as_bytes());
        hasher.update(SLOT_SEPARATOR);
        hasher.update(slots.boolean.map(|b| b.to_string()).unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }
}

// ── Identity ───────────────────────────────────────────────────────

/// The five components that address one preference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreferenceIdentity {
    pub user_id: String,
    pub namespace: Namespace,
    pub key: String,
    pub table_id: Option<String>,
    pub scope_id: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn check_component(name: &str, value: &str, required: bool) -> PrefResult<()> {
    if required && value.trim().is_empty() {
        return Err(PrefError::validation(format!("{name} is required")));
    }
    if value.contains(KEY_SEPARATOR) || value.starts_with(':') || value.ends_with(':') {
        return Err(PrefError::validation(format!(
            "{name} must not contain '::' or begin or end with ':'"
        )));
    }
    Ok(())
}

impl PreferenceIdentity {
    pub fn new(user_id: impl Into<String>, namespace: Namespace, key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            namespace,
            key: key.into(),
            table_id: None,
            scope_id: None,
        }
    }

    pub fn with_table(mut self, table_id: Option<String>) -> Self {
        self.table_id = non_empty(table_id);
        self
    }

    pub fn with_scope(mut self, scope_id: Option<String>) -> Self {
        self.scope_id = non_empty(scope_id);
        self
    }

    /// Reject identities whose unique key would be empty or ambiguous.
    pub fn validate(&self) -> PrefResult<()> {
        check_component("userId", &self.user_id, true)?;
        check_component("key", &self.key, true)?;
        check_component("tableId", self.table_id.as_deref().unwrap_or(""), false)?;
        check_component("scopeId", self.scope_id.as_deref().unwrap_or(""), false)?;
        Ok(())
    }

    /// `{userId}::{namespace}::{tableId}::{scopeId}::{key}`, absent parts empty.
    pub fn unique_key(&self) -> String {
        [
            self.user_id.as_str(),
            self.namespace.as_str(),
            self.table_id.as_deref().unwrap_or(""),
            self.scope_id.as_deref().unwrap_or(""),
            self.key.as_str(),
        ]
        .join(KEY_SEPARATOR)
    }
}

// ── Records ────────────────────────────────────────────────────────

/// One stored preference.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    /// Backing-store row ID. Informational only.
    pub id: String,
    pub user_id: String,
    pub namespace: Namespace,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    #[serde(flatten)]
    pub value: PreferenceValue,
    pub visibility: Visibility,
    pub expires_at: Option<DateTime<Utc>>,
    pub unique_key: String,
    pub checksum: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PreferenceRecord {
    /// Expired once `expires_at` is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn identity(&self) -> PreferenceIdentity {
        PreferenceIdentity {
            user_id: self.user_id.clone(),
            namespace: self.namespace,
            key: self.key.clone(),
            table_id: self.table_id.clone(),
            scope_id: self.scope_id.clone(),
        }
    }
}

/// Options for `PreferenceStore::set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// New rows default to `private`; `None` keeps an existing row's value.
    pub visibility: Option<Visibility>,
    /// Absolute expiry. Takes precedence over `ttl`.
    pub expires_at: Option<DateTime<Utc>>,
    /// Relative expiry, applied as `now + ttl` when `expires_at` is absent.
    pub ttl: Option<Duration>,
    /// `Some(false)` refuses to replace a different stored value.
    pub overwrite: Option<bool>,
}

/// Selection for `get_all` / `delete_all`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreferenceFilter {
    pub namespace: Option<Namespace>,
    pub table_id: Option<String>,
    pub scope_id: Option<String>,
    pub key: Option<String>,
    pub visibility: Option<Visibility>,
    /// `Some(true)`: only expired rows. Otherwise reads see only live rows.
    pub expired: Option<bool>,
}

/// Result of `get_all`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceList {
    pub records: Vec<PreferenceRecord>,
    pub total: usize,
}
