//! `warden pool`

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use warden_config::PoolConfig;
use warden_pool::{PoolEvent, WorkerPool};
use warden_resilience::{SignalListener, TerminationSignal};

/// Command line overrides for the configured pool
#[derive(Debug, Default)]
pub struct PoolOverrides {
    pub count: Option<usize>,
    pub enhanced: bool,
    pub max_connections: Option<u64>,
    pub stop_timeout: Option<u64>,
    pub args: Vec<String>,
}

impl PoolOverrides {
    pub fn apply(self, mut config: PoolConfig) -> PoolConfig {
        if let Some(count) = self.count {
            config.count = Some(count);
        }
        if self.enhanced {
            config.enhanced = true;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = Some(max);
        }
        if let Some(timeout) = super::millis(self.stop_timeout) {
            config.stop_timeout = Some(timeout);
        }
        if !self.args.is_empty() {
            config.args = self.args;
        }
        config
    }
}

pub async fn run(program: PathBuf, config: PoolConfig, overrides: PoolOverrides) -> Result<()> {
    let config = overrides.apply(config);
    let pool = WorkerPool::new(&program, config).context("Invalid pool configuration")?;
    let mut signals = SignalListener::install().context("Failed to install signal handlers")?;

    tokio::spawn(log_events(pool.subscribe()));

    pool.start()
        .await
        .with_context(|| format!("Failed to start pool for {}", program.display()))?;

    loop {
        match signals.recv().await {
            TerminationSignal::Hangup => {
                info!("Received SIGHUP, restarting pool");
                if let Err(e) = pool.restart().await {
                    error!("Pool restart failed: {}", e);
                }
            }
            signal => {
                info!("Received {}, stopping pool", signal);
                break;
            }
        }
    }

    pool.stop().await.context("Failed to stop pool")?;
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<PoolEvent>) {
    loop {
        match events.recv().await {
            Ok(PoolEvent::Online(worker)) => info!("worker {} (pid {}) online", worker.id(), worker.pid()),
            Ok(PoolEvent::Exit { worker, exit }) => {
                info!("worker {} (pid {}) exited with {}", worker.id(), worker.pid(), exit)
            }
            Ok(PoolEvent::Respawn { worker, exit }) => {
                warn!("worker {} respawned after exit with {}", worker.id(), exit)
            }
            Ok(PoolEvent::Recycle { worker, count }) => {
                info!("worker {} recycled after {} requests", worker.id(), count)
            }
            Ok(PoolEvent::Error { worker, message }) => {
                error!("worker {} reported: {}", worker.id(), message)
            }
            Ok(event) => info!("pool {}", event.name()),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {} pool events", missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
