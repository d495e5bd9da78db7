// Environment variable loading

use crate::{ConfigError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::env;

/// Maps environment variables to configuration keys.
///
/// With the prefix `FULCRUM`, `FULCRUM_PORT` becomes `port` and
/// `FULCRUM_LOG__LEVEL` becomes `log.level`.
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load the process environment.
    pub fn load(&self) -> Result<HashMap<String, Value>> {
        Ok(self.filter(env::vars()))
    }

    /// Map the given variables, dropping those outside the prefix.
    pub fn filter<I>(&self, vars: I) -> HashMap<String, Value>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = HashMap::new();
        for (key, value) in vars {
            let Some(key) = self.config_key(&key) else {
                continue;
            };
            config.insert(key, parse_scalar(&value));
        }
        config
    }

    fn config_key(&self, var: &str) -> Option<String> {
        let name = match &self.prefix {
            Some(prefix) => var.strip_prefix(prefix.as_str())?.strip_prefix('_')?,
            None => var,
        };
        if name.is_empty() {
            return None;
        }
        Some(name.to_lowercase().replace("__", "."))
    }

    /// Read one variable, applying the prefix.
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };

        env::var(&full_key).map_err(|source| ConfigError::Env {
            var: full_key.clone(),
            source,
        })
    }

    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Booleans and numbers become typed values; everything else stays text.
pub(crate) fn parse_scalar(value: &str) -> Value {
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = value.parse::<i64>() {
                Value::from(n)
            } else if let Some(n) = value.parse::<f64>().ok().filter(|n| n.is_finite()) {
                Value::from(n)
            } else {
                Value::String(value.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_prefix_and_nesting() {
        let loader = EnvLoader::new(Some("FULCRUM".to_string()));
        let config = loader.filter(vars(&[
            ("FULCRUM_PORT", "8080"),
            ("FULCRUM_LOG__LEVEL", "debug"),
            ("FULCRUMX_IGNORED", "1"),
            ("PATH", "/usr/bin"),
        ]));

        assert_eq!(config.len(), 2);
        assert_eq!(config["port"], Value::from(8080));
        assert_eq!(config["log.level"], Value::from("debug"));
    }

    #[test]
    fn test_scalars() {
        assert_eq!(parse_scalar("true"), Value::Bool(true));
        assert_eq!(parse_scalar("42"), Value::from(42));
        assert_eq!(parse_scalar("1.5"), Value::from(1.5));
        assert_eq!(parse_scalar("UTF-8"), Value::from("UTF-8"));
        assert_eq!(parse_scalar("inf"), Value::from("inf"));
    }

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::new(None);
        assert_eq!(loader.load_var_or("NONEXISTENT_VAR_12345", "default"), "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::new(Some("FULCRUM_TEST".to_string()));
        let err = loader.load_var("MISSING_VAR_67890").unwrap_err();
        assert_eq!(err.key(), Some("FULCRUM_TEST_MISSING_VAR_67890"));
    }
}
