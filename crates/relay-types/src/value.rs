//! Typed configuration values.
//!
//! Trigger configs, action configs, and event fields are all mappings from
//! string keys to a small closed set of value kinds. `ConfigValue` is that
//! set; it (de)serializes as plain JSON so stored workflows and webhook
//! payloads need no wrapper syntax.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A string-keyed mapping of configuration values.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// One value inside a trigger config, action config, or event field map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum ConfigValue {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<ConfigValue>),
    Map(ConfigMap),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ConfigMap> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<ConfigMap> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this value counts as an absent filter ("match any").
    pub fn is_blank(&self) -> bool {
        match self {
            ConfigValue::Null => true,
            ConfigValue::String(s) => s.trim().is_empty(),
            ConfigValue::List(items) => items.is_empty(),
            ConfigValue::Map(m) => m.is_empty(),
            ConfigValue::Bool(_) | ConfigValue::Number(_) => false,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ConfigValue::Bool(_) | ConfigValue::Number(_) | ConfigValue::String(_)
        )
    }

    /// Short kind name used in validation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Null => "null",
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Number(_) => "number",
            ConfigValue::String(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "map",
        }
    }

    /// Stringify for placeholder substitution.
    ///
    /// Strings are inserted verbatim, `Null` becomes the empty string, and
    /// lists/maps are inserted as compact JSON.
    pub fn to_template_string(&self) -> String {
        match self {
            ConfigValue::Null => String::new(),
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Number(n) => n.to_string(),
            ConfigValue::String(s) => s.clone(),
            ConfigValue::List(_) | ConfigValue::Map(_) => {
                serde_json::Value::from(self.clone()).to_string()
            }
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_template_string())
    }
}

/// Look up `path` in `fields`.
///
/// An exact key wins; otherwise the path is split on `.` and walked through
/// nested maps (and numeric indices into lists).
pub fn lookup_path<'a>(fields: &'a ConfigMap, path: &str) -> Option<&'a ConfigValue> {
    if let Some(value) = fields.get(path) {
        return Some(value);
    }
    if !path.contains('.') {
        return None;
    }

    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = fields.get(first)?;
    for segment in segments {
        current = match current {
            ConfigValue::Map(m) => m.get(segment)?,
            ConfigValue::List(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Convert an arbitrary JSON document into a config map.
///
/// Objects convert key by key; any other document yields an empty map.
pub fn config_map_from_json(value: serde_json::Value) -> ConfigMap {
    ConfigValue::from(value).into_map().unwrap_or_default()
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ConfigValue::Null,
            serde_json::Value::Bool(b) => ConfigValue::Bool(b),
            serde_json::Value::Number(n) => ConfigValue::Number(n),
            serde_json::Value::String(s) => ConfigValue::String(s),
            serde_json::Value::Array(items) => {
                ConfigValue::List(items.into_iter().map(ConfigValue::from).collect())
            }
            serde_json::Value::Object(obj) => ConfigValue::Map(
                obj.into_iter()
                    .map(|(k, v)| (k, ConfigValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<ConfigValue> for serde_json::Value {
    fn from(value: ConfigValue) -> Self {
        match value {
            ConfigValue::Null => serde_json::Value::Null,
            ConfigValue::Bool(b) => serde_json::Value::Bool(b),
            ConfigValue::Number(n) => serde_json::Value::Number(n),
            ConfigValue::String(s) => serde_json::Value::String(s),
            ConfigValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            ConfigValue::Map(m) => serde_json::Value::Object(
                m.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        ConfigValue::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        ConfigValue::String(s)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        ConfigValue::Bool(b)
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        ConfigValue::Number(n.into())
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(m: ConfigMap) -> Self {
        ConfigValue::Map(m)
    }
}
