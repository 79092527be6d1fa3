//! esg-prefcache — client-side table preference cache.
//!
//! Keeps each user's table view preferences (column visibility and order,
//! default sort, widths, list mode, page size) in an embedded
//! [redb](https://docs.rs/redb) database. Field names are swapped for
//! immutable field IDs whenever a mapping for the table is known, and back
//! again on load, so column renames in the backing store do not lose
//! preferences.
//!
//! `ClientPreferenceCache` is `Clone` + `Send` + `Sync`; mapping fetches and
//! remote pushes run as detached tasks on the current Tokio runtime.

pub mod cache;
pub mod error;
pub mod migration;
pub mod remote;
pub mod tables;

pub use cache::{CacheRead, ClientPreferenceCache};
pub use error::{CacheError, CacheResult};
pub use migration::{
    KeySpace, SortDirection, SortSpec, TablePreferences, convert_preferences_from_field_ids,
    convert_preferences_to_field_ids, is_computed_field, transition,
};
pub use remote::{ConsoleClient, MappingFetcher, PreferenceSync};
