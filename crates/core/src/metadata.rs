use serde_json::{Map, Value};

use crate::config::Config;
use crate::value::ConfigValue;
use crate::{AssemblyError, AssemblyResult};

/// Top-level key whose entries are merged into every response.
pub const SERVICE_METADATA_KEY: &str = "service_metadata";

/// Status block for service responses, with `service_metadata` merged on top.
pub fn response_metadata(
    config: &Config,
    error_code: i64,
    error_message: Option<&str>,
    status: &str,
) -> AssemblyResult<Map<String, Value>> {
    let mut metadata = Map::new();
    metadata.insert("status".to_string(), Value::from(status));
    metadata.insert("error_code".to_string(), Value::from(error_code));
    if let Some(message) = error_message {
        metadata.insert("error_message".to_string(), Value::from(message));
    }

    match config.get_opt(SERVICE_METADATA_KEY) {
        None | Some(ConfigValue::Null) => {}
        Some(ConfigValue::Map(extra)) => {
            for (key, value) in extra.iter() {
                let value = value.to_json().ok_or_else(|| {
                    AssemblyError::invalid_value(
                        SERVICE_METADATA_KEY,
                        format!("entry '{key}' is a {}, not plain data", value.kind()),
                    )
                })?;
                metadata.insert(key.to_string(), value);
            }
        }
        Some(other) => {
            return Err(AssemblyError::invalid_value(
                SERVICE_METADATA_KEY,
                format!("expected a mapping, got {}", other.kind()),
            ))
        }
    }
    Ok(metadata)
}

/// `status = "OK"`, `error_code = 0`.
pub fn ok_metadata(config: &Config) -> AssemblyResult<Map<String, Value>> {
    response_metadata(config, 0, None, "OK")
}
