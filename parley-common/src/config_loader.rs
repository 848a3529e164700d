//! Layered configuration loader.
//!
//! Supports loading configuration from two files:
//! - `config.json` - Core configuration
//! - `secrets.json` - Credentials, merged into the `upstream` section
//!
//! A `secrets.json` may either be shaped like the `upstream` section
//! (`{"api_key": "..."}`) or carry a nested `{"upstream": {...}}` object.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Load a JSON file and return its contents as a Value.
/// Returns None if file doesn't exist.
fn load_json_file(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    Ok(Some(value))
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => merge_json(target_value, source_value),
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// Load `config.json` and merge `secrets.json` over it.
///
/// Missing files are skipped; the result is an empty object when neither exists.
pub fn load_layered_config(dir: &Path) -> Result<Value> {
    tracing::debug!("Loading layered config from {}", dir.display());

    let mut config =
        load_json_file(&dir.join("config.json"))?.unwrap_or(Value::Object(Default::default()));

    if let Some(secrets) = load_json_file(&dir.join("secrets.json"))? {
        let upstream_secrets = match secrets {
            Value::Object(mut map) if map.contains_key("upstream") => {
                map.remove("upstream").unwrap_or(Value::Null)
            }
            other => other,
        };

        if let Some(config_obj) = config.as_object_mut() {
            match config_obj.get_mut("upstream") {
                Some(existing) => merge_json(existing, upstream_secrets),
                None => {
                    config_obj.insert("upstream".to_string(), upstream_secrets);
                }
            }
        }
        tracing::debug!("Loaded secrets.json");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_json_objects() {
        let mut target = json!({
            "a": 1,
            "b": { "x": 10, "y": 20 }
        });

        merge_json(&mut target, json!({ "b": { "y": 25, "z": 30 }, "c": 3 }));

        assert_eq!(target["a"], 1);
        assert_eq!(target["b"]["x"], 10);
        assert_eq!(target["b"]["y"], 25);
        assert_eq!(target["b"]["z"], 30);
        assert_eq!(target["c"], 3);
    }

    #[test]
    fn test_merge_json_overwrite_non_object() {
        let mut target = json!({ "a": [1, 2, 3] });
        merge_json(&mut target, json!({ "a": [4, 5] }));
        assert_eq!(target["a"], json!([4, 5]));
    }

    #[test]
    fn test_secrets_merge_into_upstream() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{ "upstream": { "model": "claude-3-haiku-20240307" } }"#,
        )
        .unwrap();
        fs::write(dir.path().join("secrets.json"), r#"{ "api_key": "sk-file" }"#).unwrap();

        let value = load_layered_config(dir.path()).unwrap();
        assert_eq!(value["upstream"]["model"], "claude-3-haiku-20240307");
        assert_eq!(value["upstream"]["api_key"], "sk-file");
    }

    #[test]
    fn test_nested_secrets_shape() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("secrets.json"),
            r#"{ "upstream": { "api_key": "sk-nested" } }"#,
        )
        .unwrap();

        let value = load_layered_config(dir.path()).unwrap();
        assert_eq!(value["upstream"]["api_key"], "sk-nested");
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{ not json").unwrap();

        let err = load_layered_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
