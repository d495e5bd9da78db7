// Configuration management for the Fulcrum framework

pub mod app_config;
pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use app_config::{AppConfig, LogSettings};
pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use fulcrum_core::Container;
use fulcrum_core::logging::debug;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Layered configuration store.
///
/// Keys are dotted paths (`log.level`). Later loads override earlier ones, so
/// the usual order is files, then `.env`, then the process environment.
/// Clones share the same store.
#[derive(Clone, Default)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only variables starting with `{prefix}_` are read from the environment.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::default(),
            env_prefix: Some(prefix.into()),
        }
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) -> Result<()> {
        let loader = EnvLoader::new(self.env_prefix.clone());
        let vars = loader.load()?;
        debug!(count = vars.len(), prefix = ?self.env_prefix, "Loaded environment configuration");
        self.config.write().extend(vars);
        Ok(())
    }

    /// Load the given variables as if they came from the environment.
    pub fn load_vars<I>(&self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let loader = EnvLoader::new(self.env_prefix.clone());
        self.config.write().extend(loader.filter(vars));
    }

    /// Load a `.env` file into the environment, then the environment into the
    /// store. A missing default `.env` is not an error.
    pub fn load_dotenv(&self, path: Option<&str>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path)?;
            }
            None => {
                if let Err(e) = dotenvy::dotenv() {
                    debug!(error = %e, "No .env file loaded");
                }
            }
        }
        self.load_env()
    }

    /// Load a JSON, TOML or `.env` file, by extension.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let loader = ConfigLoader::auto(path)?;
        let data = loader.load_file(path)?;
        debug!(path = %path.display(), "Loaded configuration file");
        self.merge_value(data);
        Ok(())
    }

    /// Load a file in an explicit format.
    pub fn load_file_as(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).load_file(path)?;
        self.merge_value(data);
        Ok(())
    }

    /// Parse a document and merge it in.
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).parse(content)?;
        self.merge_value(data);
        Ok(())
    }

    fn merge_value(&self, data: Value) {
        if let Value::Object(map) = data {
            let mut config = self.config.write();
            for (key, value) in map {
                config.insert(key, value);
            }
        }
    }

    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value).map_err(|source| ConfigError::Store {
            key: key.to_string(),
            source,
        })?;
        self.config.write().insert(key.to_string(), json_value);
        Ok(())
    }

    /// The value at a dotted key. Nested tables are reachable by path.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .lookup(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value).map_err(|source| ConfigError::Type {
            key: key.to_string(),
            source,
        })
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.config.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy every key of `other` over this store.
    pub fn merge(&self, other: &ConfigManager) -> Result<()> {
        if Arc::ptr_eq(&self.config, &other.config) {
            return Ok(());
        }
        let other_config = other.config.read().clone();
        self.config.write().extend(other_config);
        Ok(())
    }

    /// Deserialize the whole store into `T` and validate it.
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let validated: T = serde_json::from_value(self.tree())
            .map_err(ConfigError::Shape)?;

        validated.validate()?;

        Ok(validated)
    }

    /// Make this manager resolvable as `"config"`.
    pub fn register(&self, container: &Container) {
        container.instance("config", Arc::new(self.clone()));
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.config.read().get(key) {
            return Some(value.clone());
        }
        let tree = self.tree();
        key.split('.')
            .try_fold(&tree, |node, segment| node.get(segment))
            .cloned()
    }

    /// The store as one nested document. Dotted keys become nested tables;
    /// parents are applied before their children so the more specific key wins.
    fn tree(&self) -> Value {
        let config = self.config.read();
        let mut keys: Vec<&String> = config.keys().collect();
        keys.sort();

        let mut root = Value::Object(Map::new());
        for key in keys {
            insert_path(&mut root, key, config[key].clone());
        }
        root
    }
}

fn insert_path(node: &mut Value, key: &str, value: Value) {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };
    match key.split_once('.') {
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            insert_path(child, rest, value);
        }
        None => match map.get_mut(key) {
            Some(existing) => merge_into(existing, value),
            None => {
                map.insert(key.to_string(), value);
            }
        },
    }
}

fn merge_into(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, value) => *target = value,
    }
}
