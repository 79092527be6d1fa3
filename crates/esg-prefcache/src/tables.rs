//! redb layout of the client cache.
//!
//! A single table of JSON blobs keyed by `table_prefs_{tableId}` and
//! `field_id_mapping_{tableId}`.

use redb::TableDefinition;

pub const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

pub fn prefs_key(table_id: &str) -> String {
    format!("table_prefs_{table_id}")
}

pub fn mapping_key(table_id: &str) -> String {
    format!("field_id_mapping_{table_id}")
}
