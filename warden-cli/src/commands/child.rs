//! `warden child`

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use warden_config::ChildConfig;
use warden_process::{Child, ChildEvent};
use warden_resilience::{SignalListener, TerminationSignal};

pub async fn run(
    program: PathBuf,
    mut config: ChildConfig,
    no_respawn: bool,
    stop_timeout: Option<u64>,
    args: Vec<String>,
) -> Result<()> {
    if no_respawn {
        config.respawn = false;
    }
    if !args.is_empty() {
        config.args = args;
    }

    let child = Child::new(&program, &config);
    let mut signals = SignalListener::install().context("Failed to install signal handlers")?;
    tokio::spawn(log_events(child.subscribe()));

    child
        .start()
        .await
        .with_context(|| format!("Failed to start {}", program.display()))?;

    let signal = signals
        .recv_matching(&[TerminationSignal::Terminate, TerminationSignal::Interrupt])
        .await;
    info!("Received {}, stopping {}", signal, program.display());

    child
        .stop(super::millis(stop_timeout))
        .await
        .with_context(|| format!("Failed to stop {}", program.display()))?;
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<ChildEvent>) {
    loop {
        match events.recv().await {
            Ok(ChildEvent::Status(status)) => info!("child {}", status),
            Ok(ChildEvent::Error(message)) => error!("child reported: {}", message),
            Ok(ChildEvent::Respawn(pid)) => warn!("child respawned with pid {}", pid),
            Ok(ChildEvent::Exit(exit)) => info!("child exited with {}", exit),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {} child events", missed)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
