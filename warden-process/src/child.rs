//! Single-process supervisor
//!
//! A [`Child`] owns one managed process. `start()` spawns it and waits for the
//! first message, which must be the `{"status": "ok"}` handshake. Later
//! messages are forwarded to subscribers. On an unexpected close the child is
//! started again when respawn is enabled.
//!
//! Status transitions:
//!
//! ```text
//! ready -> starting -> ok | error
//! ok -> respawn -> starting        (unexpected exit)
//! ok -> stopping -> ready          (stop)
//! ```

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use warden_config::ChildConfig;
use warden_ipc::{ChannelMessage, HandshakeStatus, Sentinel, UNKNOWN_ERROR};

use crate::error::{SupervisorError, SupervisorResult};
use crate::handle::{ExitInfo, ProcessEvent, ProcessHandle, ProgramSpec};
use crate::Signal;

const EVENT_CAPACITY: usize = 256;

/// Supervisor status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildStatus {
    #[default]
    Ready,
    Starting,
    Ok,
    Error,
    Respawn,
    Stopping,
}

impl ChildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildStatus::Ready => "ready",
            ChildStatus::Starting => "starting",
            ChildStatus::Ok => "ok",
            ChildStatus::Error => "error",
            ChildStatus::Respawn => "respawn",
            ChildStatus::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events raised by a [`Child`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    Status(ChildStatus),
    /// Any message after the handshake
    Message(JsonValue),
    /// A `{"status": "error"}` message after the handshake
    Error(String),
    Exit(ExitInfo),
    Close,
    /// A respawned process is up, with its pid
    Respawn(u32),
}

#[derive(Default)]
struct ChildState {
    status: ChildStatus,
    process: Option<ProcessHandle>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    startup_error: Option<String>,
    running: bool,
    stopping: bool,
    close_waiters: Vec<oneshot::Sender<()>>,
}

struct ChildInner {
    spec: ProgramSpec,
    respawn: bool,
    state: Mutex<ChildState>,
    events: broadcast::Sender<ChildEvent>,
}

impl ChildInner {
    fn emit(&self, event: ChildEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: ChildStatus) {
        self.state.lock().status = status;
        debug!("{} status: {}", self.spec.display_name(), status);
        self.emit(ChildEvent::Status(status));
    }

    /// Settle a pending start from the first message
    fn complete_handshake(&self, first: JsonValue) -> SupervisorResult<()> {
        let failure = match ChannelMessage::classify(first) {
            ChannelMessage::Status(status) if status.status == HandshakeStatus::Ok => None,
            ChannelMessage::Status(status) => Some(status.error_text()),
            _ => Some(UNKNOWN_ERROR.to_string()),
        };

        // One lock: a concurrent stop either aborts this start or sees it running
        let pid = {
            let mut state = self.state.lock();
            if state.stopping {
                None
            } else if failure.is_none() {
                state.running = true;
                state.status = ChildStatus::Ok;
                self.emit(ChildEvent::Status(ChildStatus::Ok));
                Some(state.pid)
            } else {
                Some(state.pid)
            }
        };

        let Some(pid) = pid else {
            debug!("{} start aborted by stop", self.spec.display_name());
            return Err(SupervisorError::Aborted);
        };

        match failure {
            None => {
                info!(
                    "{} is up (pid {})",
                    self.spec.display_name(),
                    pid.unwrap_or_default()
                );
                Ok(())
            }
            Some(message) => Err(self.fail_startup(message)),
        }
    }

    /// Settle a pending start when the process closed before handshaking
    fn handshake_closed(&self) -> SupervisorResult<()> {
        if self.state.lock().stopping {
            debug!("{} start aborted by stop", self.spec.display_name());
            return Err(SupervisorError::Aborted);
        }
        Err(self.fail_startup(UNKNOWN_ERROR.to_string()))
    }

    fn fail_startup(&self, message: String) -> SupervisorError {
        let process = {
            let mut state = self.state.lock();
            state.startup_error = Some(message.clone());
            state.process.clone()
        };
        if let Some(process) = process {
            let _ = process.kill(Signal::SIGKILL);
        }
        warn!("{} failed to start: {}", self.spec.display_name(), message);
        self.set_status(ChildStatus::Error);
        SupervisorError::Startup(message)
    }
}

/// Supervisor for one child process
pub struct Child {
    inner: Arc<ChildInner>,
}

impl Child {
    /// Supervise `program` with the given configuration
    pub fn new(program: impl Into<PathBuf>, config: &ChildConfig) -> Self {
        Self::from_spec(
            ProgramSpec::from_child_config(program, config),
            config.respawn,
        )
    }

    pub fn from_spec(spec: ProgramSpec, respawn: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(ChildInner {
                spec,
                respawn,
                state: Mutex::new(ChildState::default()),
                events,
            }),
        }
    }

    /// Subscribe to status, message and lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ChildEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> ChildStatus {
        self.inner.state.lock().status
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.state.lock().pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.inner.state.lock().exit_code
    }

    pub fn startup_error(&self) -> Option<String> {
        self.inner.state.lock().startup_error.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.state.lock().stopping
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.inner.spec
    }

    /// Spawn the process and wait for its handshake
    pub async fn start(&self) -> SupervisorResult<()> {
        start_inner(&self.inner).await
    }

    /// Ask the process to stop and wait until it has closed.
    ///
    /// With a non-zero `timeout` the process is force-killed once it elapses.
    /// A stop during startup kills the process at once and the pending start
    /// fails with [`SupervisorError::Aborted`].
    pub async fn stop(&self, timeout: Option<Duration>) -> SupervisorResult<()> {
        let program = self.inner.spec.display_name();

        let stopping = {
            let mut state = self.inner.state.lock();
            state.stopping = true;
            let starting = state.status == ChildStatus::Starting;
            match state.process.clone() {
                Some(process) if state.running || starting => {
                    let (tx, rx) = oneshot::channel();
                    state.close_waiters.push(tx);
                    Some((process, rx, starting))
                }
                _ => None,
            }
        };

        let (process, closed, starting) = match stopping {
            Some(stopping) => stopping,
            None => {
                debug!("{} is not running, nothing to stop", program);
                self.inner.set_status(ChildStatus::Ready);
                return Ok(());
            }
        };

        info!("Stopping {} (pid {})", program, process.pid());
        self.inner.set_status(ChildStatus::Stopping);

        if starting {
            warn!("{} stopped during startup, killing", program);
            let _ = process.kill(Signal::SIGKILL);
        } else {
            if let Err(e) = process.send_sentinel(Sentinel::Stop) {
                debug!("Could not deliver stop to {}: {}", program, e);
            }

            if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
                let killer = process.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    if !killer.has_exited() {
                        warn!(
                            "Process {} did not stop within {:?}, killing",
                            killer.pid(),
                            timeout
                        );
                        let _ = killer.kill(Signal::SIGKILL);
                    }
                });
            }
        }

        let _ = closed.await;

        let exit_code = {
            let mut state = self.inner.state.lock();
            state.running = false;
            state.exit_code
        };
        self.inner.set_status(ChildStatus::Ready);
        info!("{} stopped", program);

        match exit_code {
            Some(code) if code != 0 => Err(SupervisorError::StopFailed { program, code }),
            _ => Ok(()),
        }
    }

    /// Signal the process (SIGTERM by default). Returns whether a signal was sent.
    pub fn kill(&self, signal: Option<Signal>) -> bool {
        let process = self.inner.state.lock().process.clone();
        match process {
            Some(process) if process.is_connected() => {
                process.kill(signal.unwrap_or(Signal::SIGTERM)).is_ok()
            }
            _ => false,
        }
    }

    /// Forward a message to the process. Returns whether it was attempted.
    pub fn send(&self, message: JsonValue) -> bool {
        let process = self.inner.state.lock().process.clone();
        match process {
            Some(process) => process.send(message).is_ok(),
            None => false,
        }
    }

    /// Wait until the current process (if any) has closed
    pub async fn closed(&self) {
        let waiter = {
            let mut state = self.inner.state.lock();
            if state.process.is_none() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.close_waiters.push(tx);
                Some(rx)
            }
        };

        if let Some(waiter) = waiter {
            let _ = waiter.await;
        }
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        let process = {
            let mut state = self.inner.state.lock();
            state.stopping = true;
            state.process.clone()
        };

        if let Some(process) = process {
            if !process.has_exited() {
                warn!(
                    "Supervisor for {} dropped while process {} is alive, killing",
                    self.inner.spec.display_name(),
                    process.pid()
                );
                let _ = process.kill(Signal::SIGKILL);
            }
        }
    }
}

async fn start_inner(inner: &Arc<ChildInner>) -> SupervisorResult<()> {
    // Spawn under the lock so a concurrent stop always sees the process
    let spawned = {
        let mut state = inner.state.lock();
        if let Some(process) = &state.process {
            return Err(if state.status == ChildStatus::Starting {
                SupervisorError::StartInProgress
            } else {
                SupervisorError::AlreadyRunning(process.pid())
            });
        }
        state.stopping = false;
        state.running = false;
        state.startup_error = None;
        state.exit_code = None;
        state.status = ChildStatus::Starting;

        match ProcessHandle::spawn(&inner.spec) {
            Ok((process, events)) => {
                state.pid = Some(process.pid());
                state.process = Some(process);
                Ok(events)
            }
            Err(e) => {
                state.startup_error = Some(e.to_string());
                state.status = ChildStatus::Error;
                Err(e)
            }
        }
    };
    inner.emit(ChildEvent::Status(ChildStatus::Starting));

    let events = match spawned {
        Ok(events) => events,
        Err(e) => {
            error!("{}", e);
            inner.emit(ChildEvent::Status(ChildStatus::Error));
            return Err(e.into());
        }
    };

    let (handshake_tx, handshake_rx) = oneshot::channel();
    tokio::spawn(supervise(Arc::clone(inner), events, handshake_tx));

    match handshake_rx.await {
        Ok(result) => result,
        // The supervise task always settles the handshake before it ends
        Err(_) => Err(SupervisorError::Startup(UNKNOWN_ERROR.to_string())),
    }
}

/// Drive one process's events until it closes
async fn supervise(
    inner: Arc<ChildInner>,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    handshake: oneshot::Sender<SupervisorResult<()>>,
) {
    let mut handshake = Some(handshake);

    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Message(message) => {
                if let Some(pending) = handshake.take() {
                    let _ = pending.send(inner.complete_handshake(message));
                    continue;
                }

                let error = ChannelMessage::classify(message.clone()).error_message();
                inner.emit(ChildEvent::Message(message));
                if let Some(error) = error {
                    warn!("{} reported: {}", inner.spec.display_name(), error);
                    inner.emit(ChildEvent::Error(error));
                }
            }
            ProcessEvent::Disconnect => {
                debug!("{} disconnected", inner.spec.display_name());
            }
            ProcessEvent::Exit(exit) => {
                inner.state.lock().exit_code = exit.code;
                info!("{} exited with {}", inner.spec.display_name(), exit);
                inner.emit(ChildEvent::Exit(exit));
            }
            ProcessEvent::Close => {
                if let Some(pending) = handshake.take() {
                    let _ = pending.send(inner.handshake_closed());
                }

                let (respawn, waiters) = {
                    let mut state = inner.state.lock();
                    state.process = None;
                    let respawn = inner.respawn && state.running && !state.stopping;
                    state.running = false;
                    (respawn, std::mem::take(&mut state.close_waiters))
                };

                inner.emit(ChildEvent::Close);
                for waiter in waiters {
                    let _ = waiter.send(());
                }

                if respawn {
                    warn!("{} closed unexpectedly, respawning", inner.spec.display_name());
                    inner.set_status(ChildStatus::Respawn);
                    tokio::spawn(respawn_child(Arc::clone(&inner)));
                }
                break;
            }
        }
    }
}

/// Boxed so the start -> supervise -> respawn cycle has a nameable type
fn respawn_child(inner: Arc<ChildInner>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let stopped = inner.state.lock().stopping;
        if stopped {
            debug!("{} stopped before respawn", inner.spec.display_name());
            return;
        }

        match start_inner(&inner).await {
            Ok(()) => {
                let pid = inner.state.lock().pid.unwrap_or_default();
                info!("{} respawned with pid {}", inner.spec.display_name(), pid);
                inner.emit(ChildEvent::Respawn(pid));
            }
            Err(e) => {
                error!("{} failed to respawn: {}", inner.spec.display_name(), e);
                inner.emit(ChildEvent::Error(e.to_string()));
            }
        }
    })
}
