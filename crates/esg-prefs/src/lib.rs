//! esg-prefs — preference persistence for the ESG console.
//!
//! Provides namespaced, scoped, TTL-aware, idempotent key-value semantics
//! on top of a single backing-store table whose rows carry no such
//! guarantees themselves.
//!
//! # Architecture
//!
//! Every preference row is addressed by a deterministic composite key
//! (`{user}::{namespace}::{table}::{scope}::{key}`) stored in its own
//! column; the store's row IDs are never used for addressing. The typed
//! payload lands in exactly one of three value columns, and a SHA-256
//! checksum over the payload lets `set` skip writes that change nothing.
//!
//! The `PreferenceStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<dyn RecordStore>`) and is constructed once per process.

pub mod columns;
pub mod error;
pub mod store;
pub mod types;

pub use error::{PrefError, PrefResult};
pub use store::{Clock, PreferenceStore, system_clock};
pub use types::*;
