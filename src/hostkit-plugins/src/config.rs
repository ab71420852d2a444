//! Host configuration.
//!
//! Two flavours share the [`Config`] trait: [`StaticConfig`] has a fixed key
//! set declared in code, [`DynamicConfig`] is a YAML document on disk whose
//! keys are whatever the file contains.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Key missing from a dynamic config.
    #[error("The config \"{key}\" was not found")]
    ConfigNotFound { key: String },

    /// Key not declared by a static config.
    #[error("Unknown config key: {key}")]
    KeyNotFound { key: String },

    /// Key present with a value of another type.
    #[error("Config \"{key}\" is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn mismatch(key: &str, expected: &'static str) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            expected,
        }
    }
}

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Anything else the YAML document holds (lists, maps, null)
    Other(serde_yaml::Value),
}

impl ConfigValue {
    /// Name of the value type, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Other(_) => "value",
        }
    }

    fn same_kind(&self, other: &ConfigValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Read YAML 1.1 style booleans (`yes`, `no`, `on`, `off`, ...).
pub fn parse_yaml_bool(value: &str) -> Option<bool> {
    const TRUE: [&str; 4] = ["y", "yes", "on", "true"];
    const FALSE: [&str; 4] = ["n", "no", "off", "false"];

    let value = value.trim();
    if TRUE.iter().any(|t| t.eq_ignore_ascii_case(value)) {
        Some(true)
    } else if FALSE.iter().any(|f| f.eq_ignore_ascii_case(value)) {
        Some(false)
    } else {
        None
    }
}

/// Keyed configuration lookups.
pub trait Config: Send + Sync {
    /// Config name.
    fn name(&self) -> &str;

    /// Whether keys come from a document rather than code.
    fn is_dynamic(&self) -> bool;

    /// All keys, sorted.
    fn keys(&self) -> Vec<String>;

    /// Check if a key is present.
    fn has_key(&self, key: &str) -> bool;

    /// Raw value lookup.
    fn get_value(&self, key: &str) -> Result<ConfigValue, ConfigError>;

    /// Number of keys.
    fn len(&self) -> usize {
        self.keys().len()
    }

    /// Whether no keys are present.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        match self.get_value(key)? {
            ConfigValue::String(s) => Ok(s),
            _ => Err(ConfigError::mismatch(key, "string")),
        }
    }

    fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        match self.get_value(key)? {
            ConfigValue::Bool(b) => Ok(b),
            ConfigValue::String(s) => {
                parse_yaml_bool(&s).ok_or_else(|| ConfigError::mismatch(key, "bool"))
            }
            _ => Err(ConfigError::mismatch(key, "bool")),
        }
    }

    fn get_int(&self, key: &str) -> Result<i64, ConfigError> {
        match self.get_value(key)? {
            ConfigValue::Int(i) => Ok(i),
            _ => Err(ConfigError::mismatch(key, "int")),
        }
    }

    fn get_double(&self, key: &str) -> Result<f64, ConfigError> {
        match self.get_value(key)? {
            ConfigValue::Double(d) => Ok(d),
            ConfigValue::Int(i) => Ok(i as f64),
            _ => Err(ConfigError::mismatch(key, "double")),
        }
    }
}

// ============================================================================
// StaticConfig
// ============================================================================

/// Config with a key set fixed at construction.
#[derive(Debug)]
pub struct StaticConfig {
    name: String,
    values: RwLock<BTreeMap<String, ConfigValue>>,
}

impl StaticConfig {
    /// Create an empty static config.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: RwLock::new(BTreeMap::new()),
        }
    }

    /// Declare a key with its default value.
    pub fn with(self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.values.write().insert(key.into(), value.into());
        self
    }

    /// Update a declared key. The value type cannot change.
    pub fn set(&self, key: &str, value: impl Into<ConfigValue>) -> Result<(), ConfigError> {
        let value = value.into();
        let mut values = self.values.write();
        let current = values.get_mut(key).ok_or_else(|| ConfigError::KeyNotFound {
            key: key.to_string(),
        })?;

        if !current.same_kind(&value) {
            return Err(ConfigError::mismatch(key, current.kind()));
        }

        *current = value;
        Ok(())
    }
}

impl Config for StaticConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dynamic(&self) -> bool {
        false
    }

    fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    fn has_key(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    fn get_value(&self, key: &str) -> Result<ConfigValue, ConfigError> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::KeyNotFound {
                key: key.to_string(),
            })
    }
}

// ============================================================================
// DynamicConfig
// ============================================================================

/// YAML-backed config.
#[derive(Debug)]
pub struct DynamicConfig {
    name: String,
    path: PathBuf,
    defaults: String,
    values: RwLock<BTreeMap<String, ConfigValue>>,
}

impl DynamicConfig {
    /// Open `<dir>/<name>`, writing `defaults` there first if the file is missing.
    pub fn open(
        dir: impl AsRef<Path>,
        name: impl Into<String>,
        defaults: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let dir = dir.as_ref();
        let path = dir.join(&name);
        let defaults = defaults.into();

        if !path.exists() {
            fs::create_dir_all(dir)?;
            fs::write(&path, &defaults)?;
            tracing::debug!("Created config {} from defaults", path.display());
        }

        let config = Self {
            name,
            path,
            defaults,
            values: RwLock::new(BTreeMap::new()),
        };
        config.load()?;
        Ok(config)
    }

    /// Default directory for host configs.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hostkit"))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload from disk.
    pub fn load(&self) -> Result<(), ConfigError> {
        let content = fs::read_to_string(&self.path)?;
        *self.values.write() = parse_document(&content)?;
        Ok(())
    }

    /// Replace the current values with the defaults document.
    pub fn load_defaults(&self) -> Result<(), ConfigError> {
        *self.values.write() = parse_document(&self.defaults)?;
        Ok(())
    }

    /// Write the current values to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(&*self.values.read())?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    /// Set a value. Existing keys keep their type; new keys are added.
    pub fn set(&self, key: &str, value: impl Into<ConfigValue>) -> Result<(), ConfigError> {
        let value = value.into();
        let mut values = self.values.write();

        if let Some(current) = values.get(key) {
            if !current.same_kind(&value) {
                return Err(ConfigError::mismatch(key, current.kind()));
            }
        }

        values.insert(key.to_string(), value);
        Ok(())
    }
}

fn parse_document(content: &str) -> Result<BTreeMap<String, ConfigValue>, ConfigError> {
    if content.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_yaml::from_str(content)?)
}

impl Config for DynamicConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dynamic(&self) -> bool {
        true
    }

    fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    fn has_key(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    fn get_value(&self, key: &str) -> Result<ConfigValue, ConfigError> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::ConfigNotFound {
                key: key.to_string(),
            })
    }
}
