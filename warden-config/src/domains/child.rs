//! Single-child supervisor configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigResult;
use crate::validation::{validate_no_empty_entries, Validatable};

/// Configuration for a supervised child process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildConfig {
    /// Start the child again after an unexpected exit
    #[serde(default = "crate::domains::utils::default_true")]
    pub respawn: bool,

    /// Arguments placed before the program's own arguments
    pub exec_args: Vec<String>,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Extra environment for the child
    pub env: BTreeMap<String, String>,

    /// Discard the child's stderr
    #[serde(default = "crate::domains::utils::default_false")]
    pub silent: bool,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            respawn: true,
            exec_args: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            silent: false,
        }
    }
}

impl ChildConfig {
    pub fn with_respawn(mut self, respawn: bool) -> Self {
        self.respawn = respawn;
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

impl Validatable for ChildConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_no_empty_entries(&self.exec_args, "exec_args", self.domain_name())?;

        if self.env.keys().any(|k| k.is_empty() || k.contains('=')) {
            return Err(self.validation_error("env keys must be non-empty and contain no '='"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "child"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChildConfig::default();
        assert!(config.respawn);
        assert!(!config.silent);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: ChildConfig = serde_yaml::from_str("silent: true").unwrap();
        assert!(config.respawn);
        assert!(config.silent);
    }

    #[test]
    fn test_invalid_env_key() {
        let config = ChildConfig::default().with_env("A=B", "c");
        assert!(config.validate().is_err());
    }
}
