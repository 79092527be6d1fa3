pub mod config;
pub mod types;

pub use config::ConsoleConfig;
pub use types::*;
