// Configuration file loaders

use crate::env::parse_scalar;
use crate::{ConfigError, Result};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Json => f.write_str("JSON"),
            FileFormat::Toml => f.write_str("TOML"),
            FileFormat::Env => f.write_str(".env"),
        }
    }
}

/// Configuration file loader
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Pick the format from the file extension.
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(FileFormat::from_extension)
            .map(Self::new)
            .ok_or_else(|| ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        self.parse(&content)
    }

    /// Parse a document; the result is always a JSON object.
    pub fn parse(&self, content: &str) -> Result<Value> {
        let value = match self.format {
            FileFormat::Json => self.parse_json(content)?,
            FileFormat::Toml => self.parse_toml(content)?,
            FileFormat::Env => self.parse_env(content),
        };
        if !value.is_object() {
            return Err(self.error("the document must be a table"));
        }
        Ok(value)
    }

    fn parse_json(&self, content: &str) -> Result<Value> {
        serde_json::from_str(content).map_err(|e| self.error(e))
    }

    fn parse_toml(&self, content: &str) -> Result<Value> {
        let toml_value: toml::Value = toml::from_str(content).map_err(|e| self.error(e))?;
        serde_json::to_value(toml_value).map_err(|e| self.error(e))
    }

    fn error(&self, message: impl ToString) -> ConfigError {
        ConfigError::Parse {
            format: self.format,
            message: message.to_string(),
        }
    }

    fn parse_env(&self, content: &str) -> Value {
        let mut map = serde_json::Map::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_lowercase().replace("__", ".");
                let value = value.trim().trim_matches('"').trim_matches('\'');
                map.insert(key, parse_scalar(value));
            }
        }

        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let result = loader.parse(r#"{"key": "value", "number": 42}"#).unwrap();
        assert_eq!(result["number"], 42);
    }

    #[test]
    fn test_parse_toml_tables() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            name = "shop"
            port = 8080

            [log]
            level = "debug"
        "#;

        let result = loader.parse(toml).unwrap();
        assert_eq!(result["port"], 8080);
        assert_eq!(result["log"]["level"], "debug");
    }

    #[test]
    fn test_parse_env() {
        let loader = ConfigLoader::new(FileFormat::Env);
        let env = r#"
            KEY=value
            NUMBER=42
            # Comment
            QUOTED="quoted value"
            LOG__FORMAT=pretty
        "#;

        let result = loader.parse(env).unwrap();
        assert_eq!(result["key"], "value");
        assert_eq!(result["number"], 42);
        assert_eq!(result["quoted"], "quoted value");
        assert_eq!(result["log.format"], "pretty");
    }

    #[test]
    fn test_non_table_document_rejected() {
        let loader = ConfigLoader::new(FileFormat::Json);
        assert!(matches!(
            loader.parse("[1, 2]"),
            Err(ConfigError::Parse {
                format: FileFormat::Json,
                ..
            })
        ));
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("json"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("TOML"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("env"), Some(FileFormat::Env));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert!(ConfigLoader::auto("config/app.toml").is_ok());
        assert!(matches!(
            ConfigLoader::auto("config/app"),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }
}
