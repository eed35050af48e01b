//! Process-wide registry of live supervised processes
//!
//! Every process spawned through [`crate::ProcessHandle::spawn`] is registered
//! until it has been reaped. A host calls [`shutdown_all`] from its
//! termination path so no child outlives it.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

static LIVE: Lazy<Mutex<HashMap<u32, String>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) fn register(pid: u32, program: &str) {
    LIVE.lock().insert(pid, program.to_string());
    debug!("Registered process {} ({})", pid, program);
}

pub(crate) fn deregister(pid: u32) {
    if LIVE.lock().remove(&pid).is_some() {
        debug!("Deregistered process {}", pid);
    }
}

/// Pids of every registered process
pub fn live_pids() -> Vec<u32> {
    let mut pids: Vec<u32> = LIVE.lock().keys().copied().collect();
    pids.sort_unstable();
    pids
}

pub fn is_registered(pid: u32) -> bool {
    LIVE.lock().contains_key(&pid)
}

/// Force-kill every registered process. Returns how many were signalled.
///
/// Synchronous so it can run from any termination path, inside or outside a
/// runtime. Entries are removed once each process is reaped.
pub fn shutdown_all() -> usize {
    let snapshot: Vec<(u32, String)> = LIVE
        .lock()
        .iter()
        .map(|(pid, program)| (*pid, program.clone()))
        .collect();

    let mut signalled = 0;
    for (pid, program) in snapshot {
        warn!("Force-killing {} (pid {})", program, pid);
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => signalled += 1,
            Err(e) => debug!("Could not kill process {}: {}", pid, e),
        }
    }
    signalled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_deregister() {
        // Pids far above pid_max so nothing real is touched
        register(9_999_901, "fake");
        assert!(is_registered(9_999_901));
        assert!(live_pids().contains(&9_999_901));

        deregister(9_999_901);
        assert!(!is_registered(9_999_901));
        // Second removal is a no-op
        deregister(9_999_901);
    }
}
