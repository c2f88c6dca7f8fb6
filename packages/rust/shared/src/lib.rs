//! Shared types, error model, and configuration for SenseIndex.
//!
//! This crate is the foundation depended on by all other SenseIndex crates.
//! It provides:
//! - [`SenseIndexError`] — the unified error type
//! - The [`Document`] model and [`FieldAppend`]
//! - Configuration ([`AppConfig`], [`FilterConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeConfig, FieldSelection, FieldSet, FilterConfig, FilterSection,
    WorkersConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
    load_properties_from, parse_properties,
};
pub use error::{Result, SenseIndexError};
pub use types::{Document, FIELD_NAMESPACE, FieldAppend};
