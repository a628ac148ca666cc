use url::Url;

use crate::{TaskplaneError, TaskplaneResult};

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> TaskplaneResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> TaskplaneResult<()> {
        if value.trim().is_empty() {
            return Err(TaskplaneError::Configuration(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a count or interval is greater than zero
    pub fn validate_positive(value: u64, field_name: &str) -> TaskplaneResult<()> {
        if value == 0 {
            return Err(TaskplaneError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    /// Validate that a timeout is reasonable
    pub fn validate_timeout_seconds(timeout_seconds: u64, field_name: &str) -> TaskplaneResult<()> {
        if timeout_seconds == 0 {
            return Err(TaskplaneError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout_seconds > 3600 {
            return Err(TaskplaneError::Configuration(format!(
                "{field_name} must be less than or equal to 3600"
            )));
        }
        Ok(())
    }

    /// Validate that a URL parses and uses one of the supported schemes
    pub fn validate_url(url: &str, field_name: &str, schemes: &[&str]) -> TaskplaneResult<Url> {
        Self::validate_not_empty(url, field_name)?;
        let parsed = Url::parse(url).map_err(|e| {
            TaskplaneError::Configuration(format!("{field_name} is not a valid URL: {e}"))
        })?;
        if !schemes.is_empty() && !schemes.contains(&parsed.scheme()) {
            return Err(TaskplaneError::Configuration(format!(
                "{field_name} scheme '{}' is not supported, expected one of {:?}",
                parsed.scheme(),
                schemes
            )));
        }
        Ok(parsed)
    }

    /// Validate that a value lies within an inclusive range
    pub fn validate_range(value: f64, min: f64, max: f64, field_name: &str) -> TaskplaneResult<()> {
        if !(min..=max).contains(&value) {
            return Err(TaskplaneError::Configuration(format!(
                "{field_name} must be between {min} and {max}, got {value}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("test", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("", "field").is_err());
        assert!(ValidationUtils::validate_not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_validate_timeout_seconds() {
        assert!(ValidationUtils::validate_timeout_seconds(30, "t").is_ok());
        assert!(ValidationUtils::validate_timeout_seconds(3600, "t").is_ok());
        assert!(ValidationUtils::validate_timeout_seconds(0, "t").is_err());
        assert!(ValidationUtils::validate_timeout_seconds(3601, "t").is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(ValidationUtils::validate_url("memory://", "url", &["memory"]).is_ok());
        assert!(ValidationUtils::validate_url("sqlite://beat.db", "url", &["sqlite", "memory"]).is_ok());
        assert!(ValidationUtils::validate_url("amqp://localhost:5672", "url", &["memory"]).is_err());
        assert!(ValidationUtils::validate_url("", "url", &[]).is_err());
        assert!(ValidationUtils::validate_url("not a url", "url", &[]).is_err());
    }
}
