//! Shared types, config, and error definitions for nbn-lookup.

pub mod config;
pub mod error;
pub mod slug;
pub mod types;

pub use config::LookupConfig;
pub use error::Error;
pub use slug::normalize_slug;
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
