//! PreferenceStore — preference persistence over a backing-store table.
//!
//! Rows are addressed by their `Unique Key` column, never by row ID. Writes
//! are upserts: look the key up, then create or update in place. There is
//! no locking; concurrent writers to one key race and the last write wins.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use esg_airtable::{Filter, MemoryRecordStore, Record, RecordStore};

use crate::columns::{self, RowWrite, decode_row, encode_row};
use crate::error::{PrefError, PrefResult};
use crate::types::*;

/// Source of "now" for expiry decisions and timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Namespaced, scoped, TTL-aware key-value store for user preferences.
#[derive(Clone)]
pub struct PreferenceStore {
    records: Arc<dyn RecordStore>,
    table: String,
    clock: Clock,
}

impl PreferenceStore {
    /// Store preferences as rows of `table` in `records`.
    pub fn new(records: Arc<dyn RecordStore>, table: impl Into<String>) -> Self {
        Self {
            records,
            table: table.into(),
            clock: system_clock(),
        }
    }

    /// Create a store over a fresh in-memory table (for testing).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRecordStore::new()), "Preferences")
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    async fn rows_for(&self, unique_key: &str) -> PrefResult<Vec<Record>> {
        let filter = Filter::eq(columns::UNIQUE_KEY, unique_key);
        Ok(self.records.list_records(&self.table, Some(&filter)).await?)
    }

    /// All rows of a user passing the column-level part of `filter`.
    async fn rows_matching(
        &self,
        user_id: &str,
        filter: &PreferenceFilter,
    ) -> PrefResult<Vec<Record>> {
        let mut parts = vec![Filter::eq(columns::USER_ID, user_id)];
        if let Some(namespace) = filter.namespace {
            parts.push(Filter::eq(columns::NAMESPACE, namespace.as_str()));
        }
        if let Some(table_id) = filter.table_id.as_deref().filter(|t| !t.is_empty()) {
            parts.push(Filter::eq(columns::TABLE_ID, table_id));
        }
        if let Some(scope_id) = filter.scope_id.as_deref().filter(|s| !s.is_empty()) {
            parts.push(Filter::eq(columns::SCOPE_ID, scope_id));
        }
        if let Some(key) = filter.key.as_deref().filter(|k| !k.is_empty()) {
            parts.push(Filter::eq(columns::KEY, key));
        }
        if let Some(visibility) = filter.visibility {
            parts.push(Filter::eq(columns::VISIBILITY, visibility.as_str()));
        }
        let filter = Filter::And(parts);
        Ok(self.records.list_records(&self.table, Some(&filter)).await?)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Look up one preference by its identity.
    ///
    /// Expired records read as `None` unless `include_expired` is set.
    pub async fn get(
        &self,
        identity: &PreferenceIdentity,
        include_expired: bool,
    ) -> PrefResult<Option<PreferenceRecord>> {
        identity.validate()?;
        let rows = self.rows_for(&identity.unique_key()).await?;
        let Some(row) = latest(&rows) else {
            return Ok(None);
        };
        let record = decode_row(row)?;
        if !include_expired && record.is_expired_at(self.now()) {
            debug!(unique_key = %record.unique_key, "preference expired");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// List a user's preferences.
    ///
    /// `filter.expired == Some(true)` returns only expired records; otherwise
    /// only live ones. Rows that fail to decode are skipped and logged.
    pub async fn get_all(
        &self,
        user_id: &str,
        filter: &PreferenceFilter,
    ) -> PrefResult<PreferenceList> {
        require_user(user_id)?;
        let now = self.now();
        let want_expired = filter.expired == Some(true);
        let mut records: Vec<PreferenceRecord> = self
            .rows_matching(user_id, filter)
            .await?
            .iter()
            .filter_map(|row| match decode_row(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "skipping undecodable preference row");
                    None
                }
            })
            .filter(|record| record.is_expired_at(now) == want_expired)
            .collect();
        records.sort_by(|a, b| a.unique_key.cmp(&b.unique_key));
        let total = records.len();
        Ok(PreferenceList { records, total })
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Store a loosely-typed value after checking it against `value_type`.
    pub async fn set(
        &self,
        identity: &PreferenceIdentity,
        value: Value,
        value_type: PreferenceType,
        options: &SetOptions,
    ) -> PrefResult<PreferenceRecord> {
        identity.validate()?;
        let value = PreferenceValue::from_typed(value_type, value)?;
        self.set_value(identity, value, options).await
    }

    /// Create or update a preference in place.
    ///
    /// A write whose checksum, visibility and requested expiry match the
    /// stored record is skipped and the stored record returned unchanged.
    /// With `overwrite: Some(false)` a differing stored value is a conflict.
    pub async fn set_value(
        &self,
        identity: &PreferenceIdentity,
        value: PreferenceValue,
        options: &SetOptions,
    ) -> PrefResult<PreferenceRecord> {
        identity.validate()?;
        value.validate()?;

        let now = self.now();
        let requested_expiry = match (options.expires_at, options.ttl) {
            (Some(at), _) => Some(at),
            (None, Some(ttl)) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|_| PrefError::validation("ttl is out of range"))?;
                Some(now + ttl)
            }
            (None, None) => None,
        };

        let unique_key = identity.unique_key();
        let checksum = value.checksum();
        let rows = self.rows_for(&unique_key).await?;

        let Some(row) = latest(&rows) else {
            let fields = encode_row(&RowWrite {
                identity,
                value: &value,
                visibility: options.visibility.unwrap_or_default(),
                expires_at: requested_expiry,
                checksum: &checksum,
                created_at: Some(now),
                updated_at: now,
            });
            let created = self.records.create_record(&self.table, fields).await?;
            info!(%unique_key, id = %created.id, "preference created");
            return decode_row(&created);
        };

        let existing = match decode_row(row) {
            Ok(existing) => Some(existing),
            Err(e) => {
                warn!(%unique_key, error = %e, "replacing undecodable preference row");
                None
            }
        };

        let lapsed = existing.as_ref().is_some_and(|e| e.is_expired_at(now));

        if let Some(existing) = existing.as_ref() {
            let same_payload = existing.checksum == checksum;
            let same_visibility = options.visibility.is_none_or(|v| v == existing.visibility);
            let same_expiry = requested_expiry.is_none_or(|at| Some(at) == existing.expires_at);
            if same_payload && same_visibility && same_expiry && !lapsed {
                debug!(%unique_key, "preference unchanged, write skipped");
                return Ok(existing.clone());
            }
            if options.overwrite == Some(false) && !same_payload {
                return Err(PrefError::Conflict(format!(
                    "{unique_key} already holds a different value"
                )));
            }
        } else if options.overwrite == Some(false) {
            return Err(PrefError::Conflict(format!(
                "{unique_key} already holds a value"
            )));
        }

        let fields = encode_row(&RowWrite {
            identity,
            value: &value,
            visibility: options
                .visibility
                .or(existing.as_ref().map(|e| e.visibility))
                .unwrap_or_default(),
            // A lapsed expiry is not carried onto the new value.
            expires_at: requested_expiry.or_else(|| {
                existing.as_ref().and_then(|e| e.expires_at).filter(|_| !lapsed)
            }),
            checksum: &checksum,
            created_at: None,
            updated_at: now,
        });
        let updated = self
            .records
            .update_record(&self.table, &row.id, fields)
            .await?;
        info!(%unique_key, id = %updated.id, "preference updated");
        decode_row(&updated)
    }

    /// Delete a preference. Returns whether anything was stored under it.
    pub async fn delete(&self, identity: &PreferenceIdentity) -> PrefResult<bool> {
        identity.validate()?;
        let unique_key = identity.unique_key();
        let rows = self.rows_for(&unique_key).await?;
        if rows.is_empty() {
            return Ok(false);
        }
        let ids: Vec<String> = rows.into_iter().map(|r| r.id).collect();
        let removed = self.records.delete_records(&self.table, &ids).await?;
        info!(%unique_key, removed, "preference deleted");
        Ok(removed > 0)
    }

    /// Delete every preference of a user matching `filter`.
    ///
    /// Unlike reads, an unset `expired` matches live and expired records.
    pub async fn delete_all(&self, user_id: &str, filter: &PreferenceFilter) -> PrefResult<usize> {
        require_user(user_id)?;
        let now = self.now();
        let rows = self.rows_matching(user_id, filter).await?;
        let ids: Vec<String> = rows
            .iter()
            .filter(|row| match filter.expired {
                None => true,
                Some(want_expired) => decode_row(row)
                    .map(|record| record.is_expired_at(now) == want_expired)
                    .unwrap_or(false),
            })
            .map(|row| row.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = self.records.delete_records(&self.table, &ids).await?;
        info!(%user_id, removed, "preferences bulk deleted");
        Ok(removed)
    }
}

fn require_user(user_id: &str) -> PrefResult<()> {
    if user_id.trim().is_empty() {
        return Err(PrefError::validation("userId is required"));
    }
    Ok(())
}

/// Pick the most recently updated row when racing writers left duplicates.
fn latest(rows: &[Record]) -> Option<&Record> {
    if rows.len() > 1 {
        warn!(count = rows.len(), "duplicate preference rows for one unique key");
    }
    rows.iter().max_by(|a, b| {
        let a = a.text(columns::UPDATED_AT).and_then(columns::parse_timestamp);
        let b = b.text(columns::UPDATED_AT).and_then(columns::parse_timestamp);
        a.cmp(&b)
    })
}
