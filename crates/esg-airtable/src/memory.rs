//! In-process store implementations for tests and offline runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{AirtableError, AirtableResult};
use crate::records::{Fields, Filter, Record, RecordStore};
use crate::schema::{SchemaSource, TableSchema};

/// Tables of rows held in memory. Cloning shares the underlying data.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    tables: Arc<RwLock<HashMap<String, Vec<Record>>>>,
    next_id: Arc<AtomicU64>,
    writes: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create/update/delete calls that reached the store.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a raw row, bypassing the write counter.
    pub fn seed(&self, table: &str, fields: Fields) -> Record {
        let record = self.new_record(fields);
        self.write_lock()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    fn new_record(&self, fields: Fields) -> Record {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Record {
            id: format!("rec{n:014}"),
            created_time: None,
            fields: strip_nulls(fields),
        }
    }

    fn check_available(&self) -> AirtableResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AirtableError::Request("store unavailable".to_string()));
        }
        Ok(())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<Record>>> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<Record>>> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }
}

fn strip_nulls(mut fields: Fields) -> Fields {
    fields.retain(|_, v| !v.is_null());
    fields
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_records(
        &self,
        table: &str,
        filter: Option<&Filter>,
    ) -> AirtableResult<Vec<Record>> {
        self.check_available()?;
        let tables = self.read_lock();
        let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        Ok(rows
            .iter()
            .filter(|r| filter.is_none_or(|f| f.matches(&r.fields)))
            .cloned()
            .collect())
    }

    async fn create_record(&self, table: &str, fields: Fields) -> AirtableResult<Record> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let record = self.new_record(fields);
        self.write_lock()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        debug!(%table, id = %record.id, "memory record created");
        Ok(record)
    }

    async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        fields: Fields,
    ) -> AirtableResult<Record> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.write_lock();
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == record_id))
            .ok_or_else(|| AirtableError::NotFound(format!("{table}/{record_id}")))?;
        for (column, value) in fields {
            if value == Value::Null {
                row.fields.remove(&column);
            } else {
                row.fields.insert(column, value);
            }
        }
        Ok(row.clone())
    }

    async fn delete_records(&self, table: &str, record_ids: &[String]) -> AirtableResult<usize> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let ids: HashSet<&str> = record_ids.iter().map(String::as_str).collect();
        let mut tables = self.write_lock();
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !ids.contains(r.id.as_str()));
        Ok(before - rows.len())
    }
}

/// Fixed schema listings per base.
#[derive(Clone, Default)]
pub struct MemorySchemaSource {
    bases: Arc<RwLock<HashMap<String, Vec<TableSchema>>>>,
    denied: Arc<RwLock<HashSet<String>>>,
    calls: Arc<AtomicU64>,
}

impl MemorySchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(self, base_id: &str, tables: Vec<TableSchema>) -> Self {
        self.set_base(base_id, tables);
        self
    }

    /// Replace a base's tables, e.g. to simulate an upstream rename.
    pub fn set_base(&self, base_id: &str, tables: Vec<TableSchema>) {
        self.bases
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(base_id.to_string(), tables);
    }

    /// Answer requests for `base_id` with a permission error.
    pub fn deny(&self, base_id: &str) {
        self.denied
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(base_id.to_string());
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSource for MemorySchemaSource {
    async fn list_tables(&self, base_id: &str) -> AirtableResult<Vec<TableSchema>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .denied
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(base_id)
        {
            return Err(AirtableError::Unauthorized(format!(
                "no permission to read schema of {base_id}"
            )));
        }
        self.bases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(base_id)
            .cloned()
            .ok_or_else(|| AirtableError::NotFound(format!("base {base_id}")))
    }
}
