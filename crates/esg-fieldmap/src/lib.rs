//! Field identity resolution for the ESG console.
//!
//! Column names in the backing store can be renamed at any time; field IDs
//! never change. `IdentityResolver` maps a logical table's application-facing
//! field keys to the store's field IDs, using a static registry of tables,
//! the base's schema listing, and mappings registered at runtime.

pub mod error;
pub mod registry;
pub mod resolver;

pub use error::{FieldMapError, FieldMapResult};
pub use registry::TableRegistry;
pub use resolver::IdentityResolver;
