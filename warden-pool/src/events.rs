//! Events raised by a worker pool

use warden_process::ExitInfo;

use crate::worker::Worker;

#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A worker finished starting (spawned in plain mode, handshaked in enhanced mode)
    Online(Worker),
    /// Every worker of a `start()` is online
    Started,
    Stopping,
    Stopped,
    Exit { worker: Worker, exit: ExitInfo },
    /// `worker` is online in place of one that exited with `exit`
    Respawn { worker: Worker, exit: ExitInfo },
    /// `worker` served `count` requests and is being retired
    Recycle { worker: Worker, count: u64 },
    /// `worker` reported `{"status": "error"}`
    Error { worker: Worker, message: String },
}

impl PoolEvent {
    /// Short name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            PoolEvent::Online(_) => "online",
            PoolEvent::Started => "started",
            PoolEvent::Stopping => "stopping",
            PoolEvent::Stopped => "stopped",
            PoolEvent::Exit { .. } => "exit",
            PoolEvent::Respawn { .. } => "respawn",
            PoolEvent::Recycle { .. } => "recycle",
            PoolEvent::Error { .. } => "error",
        }
    }
}
