//! Domain-driven configuration for warden
//!
//! Configuration is split by domain (single child, worker pool, logging), with
//! validation, defaults and `WARDEN_*` environment overrides.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    child::ChildConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    pool::PoolConfig,
    WardenConfig,
};

// Re-export utilities
pub use domains::utils::{serde_duration_ms, serde_duration_ms_option};
