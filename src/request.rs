//! Task definitions: loading, structural checks and per-mode validation

/// Task configuration records and JSON file loading
pub mod config;

/// Embedded JSON schema for task configuration files
pub mod schema;

/// Semantic validation rules, evaluated in a fixed order
pub mod validate;
