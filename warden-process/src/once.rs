//! Run a child that handshakes once and exits

use std::time::Duration;
use tracing::{info, warn};

use crate::child::Child;
use crate::error::{SupervisorError, SupervisorResult};
use crate::handle::ProgramSpec;
use crate::Signal;

/// Start a non-respawning child and wait for it to finish.
///
/// Succeeds when the child handshakes `ok` and closes. A handshake error is
/// returned as [`SupervisorError::Startup`]. When `timeout` elapses first the
/// child is killed and [`SupervisorError::Timeout`] is returned.
pub async fn run_once(spec: ProgramSpec, timeout: Option<Duration>) -> SupervisorResult<()> {
    let child = Child::from_spec(spec, false);
    let program = child.spec().display_name();

    let run = async {
        child.start().await?;
        child.closed().await;
        Ok(())
    };

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} did not finish within {:?}, killing", program, limit);
                child.kill(Some(Signal::SIGKILL));
                child.closed().await;
                Err(SupervisorError::Timeout)
            }
        },
        None => run.await,
    };

    if result.is_ok() {
        info!("{} finished", program);
    }
    result
}
