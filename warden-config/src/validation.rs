//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate that every entry of a list is non-empty
pub fn validate_no_empty_entries(values: &[String], field_name: &str, domain: &str) -> ConfigResult<()> {
    if let Some(index) = values.iter().position(|v| v.is_empty()) {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{}[{}] cannot be empty", field_name, index),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1usize, "count", "pool").is_ok());
        let err = validate_positive(0u64, "max_connections", "pool").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Domain configuration error in pool: max_connections must be greater than 0, got 0"
        );
    }

    #[test]
    fn test_validate_no_empty_entries() {
        assert!(validate_no_empty_entries(&["--inspect".to_string()], "exec_args", "pool").is_ok());
        assert!(validate_no_empty_entries(&[String::new()], "exec_args", "pool").is_err());
    }
}
