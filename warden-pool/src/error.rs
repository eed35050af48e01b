//! Pool error types

use thiserror::Error;
use warden_config::ConfigError;
use warden_process::{ExitInfo, ProcessError};

use crate::worker::WorkerId;

/// Pool result type
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// A worker reported `{"status": "error"}` while the pool was starting
    #[error("{0}")]
    Startup(String),

    #[error("worker {worker} exited during start with {exit}")]
    WorkerExited { worker: WorkerId, exit: ExitInfo },

    #[error("start aborted by stop")]
    StartAborted,

    #[error("pool is already running")]
    AlreadyRunning,

    #[error("pool start already in progress")]
    StartInProgress,

    #[error("pool is stopping")]
    Stopping,

    /// A worker reported `{"status": "error"}` while the pool was stopping
    #[error("{0}")]
    StopFailed(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("pool task is no longer running")]
    Closed,
}
