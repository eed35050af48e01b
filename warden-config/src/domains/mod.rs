//! Domain-specific configuration modules

pub mod child;
pub mod logging;
pub mod pool;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main warden configuration combining all domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    /// Single supervised child
    pub child: child::ChildConfig,

    /// Worker pool
    pub pool: pool::PoolConfig,

    /// Logging configuration
    pub logging: logging::LoggingConfig,
}

impl WardenConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.child.validate()?;
        self.pool.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = WardenConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
