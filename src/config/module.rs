//! Module descriptors: the `{"type": ..., "name": ..., ...}` objects that
//! make up a pipeline configuration.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// A parsed module descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDescriptor {
    pub module_type: String,
    pub name: Option<String>,
    /// Module specific configuration.
    pub config: Value,
}

impl ModuleDescriptor {
    /// Split a descriptor object into type, name and configuration.
    ///
    /// The configuration is the `config` member when present; otherwise it is
    /// every member other than `type` and `name`.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(fields) = value else {
            return Err(ConfigError::invalid(format!(
                "module descriptor must be an object, got {value}"
            )));
        };

        let module_type = match fields.get("type") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(ConfigError::MissingField("type"));
            }
            Some(other) => {
                return Err(ConfigError::invalid(format!("module type must be a string, got {other}")));
            }
        };

        let name = match fields.get("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(n)) => Some(n.clone()),
            Some(other) => {
                return Err(ConfigError::invalid(format!("module name must be a string, got {other}")));
            }
        };

        let config = match fields.get("config") {
            Some(config) => config.clone(),
            None => Value::Object(
                fields
                    .iter()
                    .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "name")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<_, _>>(),
            ),
        };

        Ok(Self {
            module_type,
            name,
            config,
        })
    }
}

/// Deserialize a module configuration; a missing configuration reads as `{}`.
pub fn parse_config<T: DeserializeOwned>(config: &Value) -> Result<T, ConfigError> {
    let config = match config {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    Ok(serde_json::from_value(config)?)
}
