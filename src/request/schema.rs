use jsonschema::JSONSchema;
use log::info;
use serde_json::Value;

use crate::settings::ConfigError;

/// Compile the embedded task configuration schema
///
/// The schema only checks structure (an object with string fields). Required fields, lengths and
/// enumerations are checked by [crate::request::validate] so each rule gets a specific error.
pub fn load_schema() -> Result<JSONSchema, ConfigError> {
    /// included task config schema
    static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/task_config.json"));
    info!("Compiling task config schema");
    let schema_json: Value = serde_json::from_str(SCHEMA).map_err(|e| ConfigError::BadSchema(e.to_string()))?;
    JSONSchema::compile(&schema_json).map_err(|e| ConfigError::BadSchema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn embedded_schema_compiles() {
        let schema = load_schema().unwrap();
        assert!(schema.is_valid(&json!({"title": "t", "upload_cnv": null})));
        assert!(!schema.is_valid(&json!(["not", "an", "object"])));
    }
}
