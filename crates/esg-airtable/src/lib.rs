//! esg-airtable — backing-store access for the ESG console.
//!
//! The console's data lives in a hosted Airtable base. This crate exposes
//! the two capabilities the preference subsystem needs as traits:
//!
//! - [`RecordStore`]: list/create/update/delete rows of a table, with
//!   structured [`Filter`]s rendered to `filterByFormula` on the wire.
//! - [`SchemaSource`]: the Meta API's table and field listing, including
//!   each field's immutable ID.
//!
//! [`AirtableClient`] implements both over REST. [`MemoryRecordStore`] and
//! [`MemorySchemaSource`] implement them in-process for tests and offline
//! runs.

pub mod client;
pub mod error;
pub mod memory;
pub mod records;
pub mod schema;

pub use client::AirtableClient;
pub use error::{AirtableError, AirtableResult};
pub use memory::{MemoryRecordStore, MemorySchemaSource};
pub use records::{Fields, Filter, Record, RecordStore};
pub use schema::{FieldSchema, SchemaSource, TableSchema};
