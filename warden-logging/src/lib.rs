//! Logging initialisation for warden
//!
//! Output always goes to stderr: stdout of every supervised child is the
//! parent channel and must carry nothing but protocol frames.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
