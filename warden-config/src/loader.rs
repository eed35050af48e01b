//! Configuration loading and environment variable handling

use crate::domains::{child::ChildConfig, logging, pool::PoolConfig, WardenConfig};
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "WARDEN".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<WardenConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: WardenConfig = serde_yaml::from_str(&content)?;
        log::debug!("Loaded configuration from {}", path.display());

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<WardenConfig> {
        let mut config = WardenConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<WardenConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut WardenConfig) -> ConfigResult<()> {
        self.apply_child_overrides(&mut config.child)?;
        self.apply_pool_overrides(&mut config.pool)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_child_overrides(&self, config: &mut ChildConfig) -> ConfigResult<()> {
        if let Some(respawn) = self.parse_env_var("CHILD_RESPAWN")? {
            config.respawn = respawn;
        }

        if let Some(silent) = self.parse_env_var("CHILD_SILENT")? {
            config.silent = silent;
        }

        Ok(())
    }

    fn apply_pool_overrides(&self, config: &mut PoolConfig) -> ConfigResult<()> {
        if let Some(count) = self.parse_env_var("POOL_COUNT")? {
            config.count = Some(count);
        }

        if let Some(enhanced) = self.parse_env_var("POOL_ENHANCED")? {
            config.enhanced = enhanced;
        }

        if let Some(respawn) = self.parse_env_var("POOL_RESPAWN")? {
            config.respawn = respawn;
        }

        if let Some(millis) = self.parse_env_var::<u64>("POOL_RESPAWN_DELAY_MS")? {
            config.respawn_delay = Duration::from_millis(millis);
        }

        if let Some(max) = self.parse_env_var("POOL_MAX_CONNECTIONS")? {
            config.max_connections = Some(max);
        }

        if let Some(millis) = self.parse_env_var::<u64>("POOL_STOP_TIMEOUT_MS")? {
            config.stop_timeout = Some(Duration::from_millis(millis));
        }

        if let Some(millis) = self.parse_env_var::<u64>("POOL_RECYCLE_TIMEOUT_MS")? {
            config.recycle_timeout = Some(Duration::from_millis(millis));
        }

        if let Some(silent) = self.parse_env_var("POOL_SILENT")? {
            config.silent = silent;
        }

        Ok(())
    }

    fn apply_logging_overrides(&self, config: &mut logging::LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Parse an optional prefixed variable
    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::logging::{LogFormat, LogLevel};
    use std::io::Write;

    #[test]
    fn test_from_file_with_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "pool:\n  count: 2\n  enhanced: true\nlogging:\n  level: debug"
        )
        .unwrap();

        temp_env::with_vars(
            [
                ("WARDEN_POOL_COUNT", Some("4")),
                ("WARDEN_POOL_STOP_TIMEOUT_MS", Some("250")),
            ],
            || {
                let config = ConfigLoader::new().from_file(file.path()).unwrap();
                assert_eq!(config.pool.count, Some(4));
                assert!(config.pool.enhanced);
                assert_eq!(config.pool.stop_timeout, Some(Duration::from_millis(250)));
                assert_eq!(config.logging.level, LogLevel::Debug);
            },
        );
    }

    #[test]
    fn test_from_env_only() {
        temp_env::with_vars(
            [
                ("WARDEN_CHILD_RESPAWN", Some("false")),
                ("WARDEN_LOG_FORMAT", Some("json")),
                ("WARDEN_POOL_MAX_CONNECTIONS", Some("10")),
            ],
            || {
                let config = ConfigLoader::new().from_env().unwrap();
                assert!(!config.child.respawn);
                assert_eq!(config.logging.format, LogFormat::Json);
                assert_eq!(config.pool.max_connections, Some(10));
            },
        );
    }

    #[test]
    fn test_invalid_env_value() {
        temp_env::with_var("WARDEN_POOL_COUNT", Some("many"), || {
            let err = ConfigLoader::new().from_env().unwrap_err();
            assert!(matches!(err, ConfigError::EnvError(_)));
        });
    }

    #[test]
    fn test_env_override_is_validated() {
        temp_env::with_var("WARDEN_POOL_COUNT", Some("0"), || {
            let err = ConfigLoader::new().from_env().unwrap_err();
            assert!(matches!(err, ConfigError::DomainError { .. }));
        });
    }

    #[test]
    fn test_custom_prefix() {
        temp_env::with_var("MYAPP_POOL_ENHANCED", Some("true"), || {
            let config = ConfigLoader::with_prefix("MYAPP").from_env().unwrap();
            assert!(config.pool.enhanced);
        });
    }

    #[test]
    fn test_load_without_path() {
        temp_env::with_var_unset("WARDEN_POOL_COUNT", || {
            let config = ConfigLoader::new().load(None::<&Path>).unwrap();
            assert_eq!(config.pool.count, None);
        });
    }
}
