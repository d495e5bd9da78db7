// Typed application settings

use crate::validation::{ConfigValidator, Validate};
use crate::{ConfigError, ConfigManager, Result};
use fulcrum_core::ApplicationOptions;
use fulcrum_core::logging::{LogConfig, LogFormat, LogLevel};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Settings an application boots from.
///
/// Every field has a default, so a partial document (or none at all) is
/// enough. With the `FULCRUM` prefix, `FULCRUM_PORT=9000` and
/// `FULCRUM_LOG__LEVEL=debug` override the file values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub debug: bool,
    pub host: String,
    pub port: u16,
    pub charset: String,
    pub trusted_proxies: Vec<String>,
    pub filters_enabled: bool,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "fulcrum".to_string(),
            debug: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
            charset: "UTF-8".to_string(),
            trusted_proxies: Vec::new(),
            filters_enabled: true,
            log: LogSettings::default(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.name, "name")?;
        ConfigValidator::is_port(self.port, "port")?;
        ConfigValidator::not_empty(&self.charset, "charset")?;
        ConfigValidator::ip_addresses(&self.trusted_proxies, "trusted_proxies")?;
        self.log.level()?;
        self.log.format()?;
        Ok(())
    }
}

impl LogSettings {
    pub fn level(&self) -> Result<LogLevel> {
        self.level
            .parse()
            .map_err(|e| ConfigError::invalid("log.level", e))
    }

    pub fn format(&self) -> Result<LogFormat> {
        self.format
            .parse()
            .map_err(|e| ConfigError::invalid("log.format", e))
    }
}

impl AppConfig {
    /// Read and validate the settings held by `manager`.
    pub fn from_manager(manager: &ConfigManager) -> Result<Self> {
        manager.load_validated()
    }

    /// The knobs the core application needs.
    pub fn application_options(&self) -> Result<ApplicationOptions> {
        Ok(ApplicationOptions {
            charset: self.charset.clone(),
            trusted_proxies: ConfigValidator::ip_addresses(&self.trusted_proxies, "trusted_proxies")?,
            filters_enabled: self.filters_enabled,
            debug: self.debug,
        })
    }

    pub fn log_config(&self) -> Result<LogConfig> {
        Ok(LogConfig::new()
            .level(self.log.level()?)
            .format(self.log.format()?))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("host", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
    }

    #[test]
    fn test_validation_failures() {
        let config = AppConfig {
            port: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().key(), Some("port"));

        let config = AppConfig {
            charset: String::new(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AppConfig {
            trusted_proxies: vec!["proxy.internal".to_string()],
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.log.level = "loud".to_string();
        assert_eq!(config.validate().unwrap_err().key(), Some("log.level"));
    }

    #[test]
    fn test_application_options() {
        let config = AppConfig {
            debug: true,
            charset: "ISO-8859-1".to_string(),
            trusted_proxies: vec!["10.0.0.1".to_string()],
            filters_enabled: false,
            ..AppConfig::default()
        };
        let options = config.application_options().unwrap();
        assert!(options.debug);
        assert!(!options.filters_enabled);
        assert_eq!(options.charset, "ISO-8859-1");
        assert_eq!(options.trusted_proxies, vec!["10.0.0.1".parse::<std::net::IpAddr>().unwrap()]);
    }

    #[test]
    fn test_log_config() {
        let mut config = AppConfig::default();
        config.log.level = "debug".to_string();
        config.log.format = "pretty".to_string();
        let log = config.log_config().unwrap();
        assert_eq!(log.level, LogLevel::Debug);
        assert_eq!(log.format, LogFormat::Pretty);
    }
}
