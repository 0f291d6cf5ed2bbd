//! Sectioned key/value configuration tree.
//!
//! Metadata sidecars are parsed into a [`Configuration`], an ordered map of
//! keys to JSON values where nested tables act as groups. Cloning a
//! configuration is a deep copy, which is what hands every plugin instance its
//! own independent copy of the plugin configuration.
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ErrorSource, PluginManagerError, Result};

/// Supported metadata file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// TOML format, used for .conf, .toml and anything unrecognized - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl ConfigFormat {
    /// Determine format from a metadata suffix such as `.conf` or `.json`
    pub fn from_suffix(suffix: &str) -> Self {
        match suffix.trim_start_matches('.').to_lowercase().as_str() {
            "json" => ConfigFormat::Json,
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => ConfigFormat::Yaml,
            _ => Self::sectioned(),
        }
    }

    /// Determine format from a file extension
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_suffix)
            .unwrap_or_else(Self::sectioned)
    }

    #[cfg(feature = "toml-config")]
    fn sectioned() -> Self {
        ConfigFormat::Toml
    }

    #[cfg(not(feature = "toml-config"))]
    fn sectioned() -> Self {
        ConfigFormat::Json
    }
}

/// In-memory configuration tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: Map<String, Value>,
}

impl Configuration {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration text. The top level has to be a table.
    pub fn parse(text: &str, format: ConfigFormat) -> std::result::Result<Self, ErrorSource> {
        let value: Value = match format {
            ConfigFormat::Json => serde_json::from_str(text)?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(text)?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(text)?,
        };
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::default()),
            other => Err(ErrorSource::Structure(format!(
                "expected a table at the top level, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Read and parse a file, picking the format from its extension
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PluginManagerError::MetadataNotFound { path: path.to_path_buf() });
        }
        let text = fs::read_to_string(path).map_err(|source| PluginManagerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, ConfigFormat::from_path(path)).map_err(|source| PluginManagerError::Parse {
            origin: path.display().to_string(),
            source: Box::new(source),
        })
    }

    /// Scalar value rendered as a string. For a list this is its first element.
    pub fn value(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::Array(items) => items.first().and_then(scalar_to_string),
            value => scalar_to_string(value),
        }
    }

    /// Typed value
    pub fn value_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// All values under a key. A single scalar counts as a one-element list.
    pub fn values(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(scalar_to_string).collect(),
            Some(value) => scalar_to_string(value).into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn set_value<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|source| PluginManagerError::Value {
            key: key.to_string(),
            source,
        })?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove_value(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Whether `key` holds a value rather than a group
    pub fn has_value(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|value| !value.is_object())
    }

    /// Deep copy of a nested group
    pub fn group(&self, name: &str) -> Option<Configuration> {
        match self.values.get(name)? {
            Value::Object(values) => Some(Self { values: values.clone() }),
            _ => None,
        }
    }

    /// Replace or add a nested group
    pub fn set_group(&mut self, name: &str, group: Configuration) {
        self.values.insert(name.to_string(), Value::Object(group.values));
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(Value::is_object)
    }

    /// Names of all values and groups, in key order
    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge with another configuration, overriding existing keys
    pub fn merge(&mut self, other: &Configuration) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a table",
    }
}
