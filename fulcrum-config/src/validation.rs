// Configuration validation

use crate::{ConfigError, Result};
use std::net::IpAddr;

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Common validation rules.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    pub fn in_range<T: PartialOrd + std::fmt::Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::invalid(
                field,
                format!("must be between {} and {}", min, max),
            ));
        }
        Ok(())
    }

    pub fn one_of<T: PartialEq>(value: &T, allowed: &[T], field: &str) -> Result<()> {
        if !allowed.contains(value) {
            return Err(ConfigError::invalid(field, "must be one of the allowed values"));
        }
        Ok(())
    }

    pub fn is_port(value: u16, field: &str) -> Result<()> {
        if value == 0 {
            return Err(ConfigError::invalid(field, "must be a valid port number"));
        }
        Ok(())
    }

    /// Parse every entry as an IP address.
    pub fn ip_addresses(values: &[String], field: &str) -> Result<Vec<IpAddr>> {
        values
            .iter()
            .map(|value| {
                value.trim().parse::<IpAddr>().map_err(|_| {
                    ConfigError::invalid(field, format!("'{}' is not an IP address", value))
                })
            })
            .collect()
    }
}
