//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::broadcast;

pub const CHILD: &str = env!("CARGO_BIN_EXE_fixture_child");
pub const CHILD_ERROR: &str = env!("CARGO_BIN_EXE_fixture_child_error");
pub const ONCE: &str = env!("CARGO_BIN_EXE_fixture_once");
pub const WORKER: &str = env!("CARGO_BIN_EXE_fixture_worker");

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Wait for the first event matching `wanted`, skipping the rest
pub async fn wait_for<E: Clone>(
    events: &mut broadcast::Receiver<E>,
    mut wanted: impl FnMut(&E) -> bool,
) -> E {
    loop {
        match tokio::time::timeout(EVENT_TIMEOUT, events.recv()).await {
            Ok(Ok(event)) if wanted(&event) => return event,
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for event"),
        }
    }
}

/// Collect every event that arrives within `window`
pub async fn drain<E: Clone>(events: &mut broadcast::Receiver<E>, window: Duration) -> Vec<E> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}
