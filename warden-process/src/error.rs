//! Process and supervisor error types

use thiserror::Error;

/// Result type for process handle operations
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Result type for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors raised by the process handle abstraction
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Spawned process has no pid")]
    MissingPid,

    #[error("Process {pid} was spawned without a {pipe} pipe")]
    MissingPipe { pid: u32, pipe: &'static str },

    #[error("Process {0} is not connected")]
    NotConnected(u32),

    #[error("Process {0} has already exited")]
    AlreadyExited(u32),

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },
}

/// Errors raised by the single-process supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The child reported a failed bring-up, or exited before reporting
    #[error("{0}")]
    Startup(String),

    /// A stop arrived while the start was waiting for the handshake
    #[error("start aborted by stop")]
    Aborted,

    #[error("process already running with pid {0}")]
    AlreadyRunning(u32),

    #[error("process start already in progress")]
    StartInProgress,

    #[error("{program} failed with code: {code}")]
    StopFailed { program: String, code: i32 },

    #[error("process timeout reached, killed")]
    Timeout,

    #[error(transparent)]
    Process(#[from] ProcessError),
}
