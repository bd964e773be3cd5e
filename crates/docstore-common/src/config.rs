//! Configuration providers
//!
//! A [`Config`] is a flat string lookup. Clients read the keys they need at
//! construction time and never afterwards.

use std::collections::HashMap;

/// String-keyed configuration lookup with optional defaults
pub trait Config: Send + Sync {
    /// Look up a key. Missing and empty values are both `None`.
    fn get(&self, key: &str) -> Option<String>;

    /// Look up a key, falling back to `default` when unset
    fn get_or_default(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// Reads configuration from the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    prefix: Option<String>,
}

impl EnvConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `prefix` to every key, e.g. `ORDERS_` turns `MONGO_URI` into `ORDERS_MONGO_URI`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn resolve(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }
}

impl Config for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.resolve(key))
            .ok()
            .filter(|value| !value.is_empty())
    }
}

/// In-memory configuration, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MapConfig {
    values: HashMap<String, String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl Config for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .filter(|value| !value.is_empty())
            .cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for MapConfig
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
