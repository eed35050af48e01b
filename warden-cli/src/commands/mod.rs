//! Command implementations

pub mod child;
pub mod config;
pub mod pool;
pub mod run_once;

use std::time::Duration;

pub(crate) fn millis(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_millis)
}
