//! Worker pool handle

use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc, oneshot};
use warden_config::{PoolConfig, Validatable};
use warden_process::{ProgramSpec, Signal};

use crate::actor::{self, Command};
use crate::error::{PoolError, PoolResult};
use crate::events::PoolEvent;
use crate::worker::Worker;

const EVENT_CAPACITY: usize = 256;

/// Point-in-time view of a pool
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub running: bool,
    pub stopping: bool,
    /// Requests reported by all workers since the pool was created
    pub requests: u64,
    pub workers: Vec<WorkerSnapshot>,
}

#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub worker: Worker,
    pub online: bool,
    pub recycling: bool,
    pub requests: u64,
}

/// Handle to a pool of workers running one program.
///
/// Cloning the handle is cheap. Once every clone is dropped the pool kills
/// its remaining workers.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PoolEvent>,
}

impl WorkerPool {
    /// Create a pool for `program`. Workers are not started until [`start`](Self::start).
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(program: impl Into<PathBuf>, config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        let spec = ProgramSpec::from_pool_config(program, &config);
        Ok(Self::from_spec(spec, config))
    }

    /// Create a pool from a prepared program spec. `config` supplies the
    /// pool policy; its program fields are ignored.
    pub fn from_spec(spec: ProgramSpec, config: PoolConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let commands = actor::spawn(spec, config, events.clone());
        Self { commands, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Fork `count` workers and wait until all of them are online
    pub async fn start(&self) -> PoolResult<()> {
        self.request(Command::Start).await?
    }

    /// Stop every worker and wait until all of them exited
    pub async fn stop(&self) -> PoolResult<()> {
        self.request(Command::Stop).await?
    }

    pub async fn restart(&self) -> PoolResult<()> {
        self.stop().await?;
        self.start().await
    }

    /// Fork one extra worker without waiting for it to come online
    pub async fn fork(&self) -> PoolResult<Worker> {
        self.request(Command::Fork).await?
    }

    /// Broadcast a message to every connected worker
    pub fn send(&self, message: JsonValue) -> PoolResult<()> {
        self.commands
            .send(Command::Send(message))
            .map_err(|_| PoolError::Closed)
    }

    /// Signal every worker. Killed workers are not respawned.
    pub fn kill(&self, signal: Signal) -> PoolResult<()> {
        self.commands
            .send(Command::Kill(signal))
            .map_err(|_| PoolError::Closed)
    }

    pub async fn workers(&self) -> PoolResult<Vec<Worker>> {
        self.request(Command::Workers).await
    }

    /// Run `f` for every current worker
    pub async fn each<F>(&self, mut f: F) -> PoolResult<()>
    where
        F: FnMut(&Worker),
    {
        for worker in self.workers().await? {
            f(&worker);
        }
        Ok(())
    }

    pub async fn size(&self) -> PoolResult<usize> {
        Ok(self.workers().await?.len())
    }

    pub async fn snapshot(&self) -> PoolResult<PoolSnapshot> {
        self.request(Command::Snapshot).await
    }

    pub async fn is_running(&self) -> PoolResult<bool> {
        Ok(self.snapshot().await?.running)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> PoolResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| PoolError::Closed)?;
        reply_rx.await.map_err(|_| PoolError::Closed)
    }
}
