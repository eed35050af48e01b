//! Pool member handle

use serde_json::Value as JsonValue;
use std::fmt;
use warden_process::{ProcessHandle, ProcessResult, Signal};

/// Identity of a pool member, unique for the lifetime of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cloneable handle to one worker process
#[derive(Debug, Clone)]
pub struct Worker {
    id: WorkerId,
    process: ProcessHandle,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, process: ProcessHandle) -> Self {
        Self { id, process }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub fn send(&self, message: JsonValue) -> ProcessResult<()> {
        self.process.send(message)
    }

    pub fn kill(&self, signal: Signal) -> ProcessResult<()> {
        self.process.kill(signal)
    }

    pub fn disconnect(&self) -> bool {
        self.process.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.process.is_connected()
    }

    pub fn has_exited(&self) -> bool {
        self.process.has_exited()
    }
}

impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Worker {}
