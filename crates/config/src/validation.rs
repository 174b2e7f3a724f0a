use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a `host:port` address is well formed
    pub fn validate_socket_address(value: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(value, field_name)?;
        let Some((host, port)) = value.rsplit_once(':') else {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be in host:port form"
            )));
        };
        if host.is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} has an empty host"
            )));
        }
        match port.parse::<u16>() {
            Ok(0) | Err(_) => Err(crate::ConfigError::Validation(format!(
                "{field_name} has an invalid port: {port}"
            ))),
            Ok(_) => Ok(()),
        }
    }

    /// Validate that an interval is positive and at most one hour
    pub fn validate_interval_seconds(seconds: u64, field_name: &str) -> ConfigResult<()> {
        if seconds == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if seconds > 3600 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600"
            )));
        }
        Ok(())
    }

    /// Validate an optional retention window or interval
    pub fn validate_positive(value: Option<f64>, field_name: &str) -> ConfigResult<()> {
        match value {
            Some(v) if !v.is_finite() || v <= 0.0 => Err(crate::ConfigError::Validation(
                format!("{field_name} must be a positive number"),
            )),
            _ => Ok(()),
        }
    }

    /// Validate that a URL has a valid format
    pub fn validate_url(url: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;

        if !url.contains("://") {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a valid URL with protocol"
            )));
        }

        Ok(())
    }
}
