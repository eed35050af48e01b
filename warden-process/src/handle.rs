//! Process handle abstraction
//!
//! A [`ProcessHandle`] owns the parent's end of a spawned program's stdio
//! channel. Outbound messages go through a writer task that owns the child's
//! stdin. A monitor task owns the child itself and its stdout, and reports
//! [`ProcessEvent`]s in order: messages, then `Disconnect` at end of stdout,
//! `Exit` when the process is reaped, and finally `Close` once both happened.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use warden_config::{ChildConfig, PoolConfig};
use warden_ipc::{IpcReader, IpcWriter, Sentinel, CHANNEL_ENV, CHANNEL_STDIO};

use crate::error::{ProcessError, ProcessResult};
use crate::registry;

/// What to run and how
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramSpec {
    pub program: PathBuf,
    /// Arguments placed before `args`
    pub exec_args: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Discard stderr instead of inheriting it
    pub silent: bool,
    pub current_dir: Option<PathBuf>,
}

impl ProgramSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Spec for a supervised child
    pub fn from_child_config(program: impl Into<PathBuf>, config: &ChildConfig) -> Self {
        Self {
            program: program.into(),
            exec_args: config.exec_args.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            silent: config.silent,
            current_dir: None,
        }
    }

    /// Spec shared by every worker of a pool
    pub fn from_pool_config(program: impl Into<PathBuf>, config: &PoolConfig) -> Self {
        Self {
            program: program.into(),
            exec_args: config.exec_args.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            silent: config.silent,
            current_dir: None,
        }
    }

    pub fn with_exec_args<I, S>(mut self, exec_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_args = exec_args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn display_name(&self) -> String {
        self.program.display().to_string()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.exec_args)
            .args(&self.args)
            .envs(&self.env)
            .env(CHANNEL_ENV, CHANNEL_STDIO)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.silent {
                Stdio::null()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true);

        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        command
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Terminated by the given signal
    pub fn killed_by(&self, signal: Signal) -> bool {
        self.signal == Some(signal as i32)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "code {}", code),
            (None, Some(signal)) => match Signal::try_from(signal) {
                Ok(sig) => write!(f, "signal {}", sig),
                Err(_) => write!(f, "signal {}", signal),
            },
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Events observed on a spawned process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// A message arrived on the channel
    Message(JsonValue),
    /// The child's end of the channel closed
    Disconnect,
    /// The process was reaped
    Exit(ExitInfo),
    /// Exited and fully drained; always the last event
    Close,
}

struct HandleInner {
    pid: u32,
    program: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<JsonValue>>>,
    exited: Arc<AtomicBool>,
}

/// Cloneable handle to one spawned process
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<HandleInner>,
}

impl ProcessHandle {
    /// Spawn the program and start its writer and monitor tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        spec: &ProgramSpec,
    ) -> ProcessResult<(Self, mpsc::UnboundedReceiver<ProcessEvent>)> {
        let program = spec.display_name();
        let mut child = spec.command().spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let pid = child.id().ok_or(ProcessError::MissingPid)?;
        let stdin = child
            .stdin
            .take()
            .ok_or(ProcessError::MissingPipe { pid, pipe: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe { pid, pipe: "stdout" })?;

        registry::register(pid, &program);
        info!("Spawned {} with pid {}", program, pid);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let exited = Arc::new(AtomicBool::new(false));

        tokio::spawn(stdin_writer_task(pid, IpcWriter::new(stdin), outbound_rx));
        tokio::spawn(monitor_task(
            pid,
            child,
            IpcReader::new(stdout),
            Arc::clone(&exited),
            event_tx,
        ));

        let handle = Self {
            inner: Arc::new(HandleInner {
                pid,
                program,
                outbound: Mutex::new(Some(outbound_tx)),
                exited,
            }),
        };

        Ok((handle, event_rx))
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn program(&self) -> &str {
        &self.inner.program
    }

    /// Queue a message for the child
    pub fn send(&self, message: JsonValue) -> ProcessResult<()> {
        let outbound = self.inner.outbound.lock();
        match outbound.as_ref() {
            Some(sender) => sender
                .send(message)
                .map_err(|_| ProcessError::NotConnected(self.inner.pid)),
            None => Err(ProcessError::NotConnected(self.inner.pid)),
        }
    }

    pub fn send_sentinel(&self, sentinel: Sentinel) -> ProcessResult<()> {
        self.send(sentinel.to_value())
    }

    /// Close the channel once queued messages are written.
    /// Returns false if it was already disconnected.
    pub fn disconnect(&self) -> bool {
        let sender = self.inner.outbound.lock().take();
        if sender.is_some() {
            debug!("Disconnecting from process {}", self.inner.pid);
        }
        sender.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .outbound
            .lock()
            .as_ref()
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
    }

    pub fn has_exited(&self) -> bool {
        self.inner.exited.load(Ordering::SeqCst)
    }

    /// Send a signal to the process
    pub fn kill(&self, signal: Signal) -> ProcessResult<()> {
        if self.has_exited() {
            return Err(ProcessError::AlreadyExited(self.inner.pid));
        }

        debug!("Sending {} to process {}", signal, self.inner.pid);
        kill(Pid::from_raw(self.inner.pid as i32), signal).map_err(|source| {
            ProcessError::Signal {
                pid: self.inner.pid,
                source,
            }
        })
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.inner.pid)
            .field("program", &self.inner.program)
            .field("exited", &self.has_exited())
            .finish()
    }
}

/// Write queued messages to the child's stdin until disconnected
async fn stdin_writer_task(
    pid: u32,
    mut writer: IpcWriter<ChildStdin>,
    mut outbound: mpsc::UnboundedReceiver<JsonValue>,
) {
    while let Some(message) = outbound.recv().await {
        trace!("Sending {} to process {}", message, pid);
        if let Err(e) = writer.send(&message).await {
            debug!("Channel to process {} closed: {}", pid, e);
            return;
        }
    }

    // Every sender is gone: close the child's stdin
    if let Err(e) = writer.close().await {
        trace!("Closing stdin of process {}: {}", pid, e);
    }
}

/// Pump the child's stdout and wait for it to exit
async fn monitor_task(
    pid: u32,
    mut child: tokio::process::Child,
    mut reader: IpcReader<ChildStdout>,
    exited: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let mut reading = true;
    let mut exit: Option<ExitInfo> = None;

    while reading || exit.is_none() {
        // Drain buffered frames before reporting the exit
        tokio::select! {
            biased;
            frame = reader.receive(), if reading => match frame {
                Ok(Some(message)) => {
                    trace!("Received {} from process {}", message, pid);
                    let _ = events.send(ProcessEvent::Message(message));
                }
                Ok(None) => {
                    debug!("Process {} disconnected", pid);
                    reading = false;
                    let _ = events.send(ProcessEvent::Disconnect);
                }
                Err(e) if e.is_frame_error() => {
                    warn!("Skipping malformed frame from process {}: {}", pid, e);
                }
                Err(e) => {
                    debug!("Channel from process {} failed: {}", pid, e);
                    reading = false;
                    let _ = events.send(ProcessEvent::Disconnect);
                }
            },
            status = child.wait(), if exit.is_none() => {
                let info = match status {
                    Ok(status) => ExitInfo::from(status),
                    Err(e) => {
                        warn!("Failed to wait for process {}: {}", pid, e);
                        ExitInfo::default()
                    }
                };
                exited.store(true, Ordering::SeqCst);
                registry::deregister(pid);
                debug!("Process {} exited with {}", pid, info);
                exit = Some(info);
                let _ = events.send(ProcessEvent::Exit(info));
            }
        }
    }

    let _ = events.send(ProcessEvent::Close);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const OK_FRAME: &str =
        r#"{"protocol_version":1,"timestamp":"2024-01-01T00:00:00Z","message":{"status":"ok"}}"#;

    fn shell(script: &str) -> ProgramSpec {
        ProgramSpec::new("/bin/sh").with_args(["-c", script])
    }

    async fn collect(mut events: mpsc::UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut seen = Vec::new();
        while let Ok(Some(event)) = timeout(Duration::from_secs(10), events.recv()).await {
            let done = event == ProcessEvent::Close;
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    #[test]
    fn test_program_spec_from_pool_config() {
        let config = PoolConfig::default()
            .with_args(["--port", "3000"])
            .with_env("MODE", "test")
            .with_silent(true);
        let spec = ProgramSpec::from_pool_config("bin/server", &config);

        assert_eq!(spec.args, vec!["--port".to_string(), "3000".to_string()]);
        assert_eq!(spec.env.get("MODE").map(String::as_str), Some("test"));
        assert!(spec.silent);
        assert_eq!(spec.display_name(), "bin/server");
    }

    #[test]
    fn test_exit_info_display() {
        let exited = ExitInfo {
            code: Some(3),
            signal: None,
        };
        assert_eq!(exited.to_string(), "code 3");

        let killed = ExitInfo {
            code: None,
            signal: Some(Signal::SIGKILL as i32),
        };
        assert!(killed.killed_by(Signal::SIGKILL));
        assert_eq!(killed.to_string(), "signal SIGKILL");
    }

    #[tokio::test]
    async fn test_events_are_ordered() {
        let script = format!("echo 'not a frame'; echo '{}'; exit 3", OK_FRAME);
        let (handle, events) = ProcessHandle::spawn(&shell(&script).with_silent(true)).unwrap();
        assert!(handle.pid() > 0);

        let seen = collect(events).await;
        assert_eq!(seen.first(), Some(&ProcessEvent::Message(json!({"status": "ok"}))));
        assert_eq!(seen.last(), Some(&ProcessEvent::Close));
        assert!(seen.contains(&ProcessEvent::Disconnect));
        assert!(seen.contains(&ProcessEvent::Exit(ExitInfo {
            code: Some(3),
            signal: None
        })));
        assert!(handle.has_exited());
        assert!(!registry::is_registered(handle.pid()));
    }

    #[tokio::test]
    async fn test_non_utf8_output_keeps_channel_open() {
        let script = format!("printf '\\377\\376\\n'; echo '{}'; sleep 0.2", OK_FRAME);
        let (_handle, events) = ProcessHandle::spawn(&shell(&script)).unwrap();

        let seen = collect(events).await;
        assert_eq!(seen.first(), Some(&ProcessEvent::Message(json!({"status": "ok"}))));
        assert_eq!(seen.len(), 4);
        assert!(seen.contains(&ProcessEvent::Disconnect));
        assert!(seen.contains(&ProcessEvent::Exit(ExitInfo {
            code: Some(0),
            signal: None
        })));
        assert_eq!(seen.last(), Some(&ProcessEvent::Close));
    }

    #[tokio::test]
    async fn test_channel_reaches_child_stdin() {
        // Echo the first inbound frame back out
        let (handle, events) = ProcessHandle::spawn(&shell("read line; echo \"$line\"")).unwrap();
        handle.send(json!({"ping": 1})).unwrap();

        let seen = collect(events).await;
        assert_eq!(seen.first(), Some(&ProcessEvent::Message(json!({"ping": 1}))));
    }

    #[tokio::test]
    async fn test_disconnect_closes_stdin() {
        // `cat` exits at end of input
        let (handle, events) = ProcessHandle::spawn(&ProgramSpec::new("cat")).unwrap();
        assert!(handle.is_connected());
        assert!(registry::is_registered(handle.pid()));

        assert!(handle.disconnect());
        assert!(!handle.disconnect());
        assert!(!handle.is_connected());
        assert!(handle.send(json!("stop")).is_err());

        let seen = collect(events).await;
        assert!(seen.contains(&ProcessEvent::Exit(ExitInfo {
            code: Some(0),
            signal: None
        })));
    }

    #[tokio::test]
    async fn test_kill() {
        let (handle, events) = ProcessHandle::spawn(&ProgramSpec::new("sleep").with_args(["30"]))
            .unwrap();
        handle.kill(Signal::SIGKILL).unwrap();

        let seen = collect(events).await;
        let exit = seen.iter().find_map(|event| match event {
            ProcessEvent::Exit(info) => Some(*info),
            _ => None,
        });
        assert!(exit.unwrap().killed_by(Signal::SIGKILL));
        assert!(matches!(
            handle.kill(Signal::SIGTERM),
            Err(ProcessError::AlreadyExited(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let result = ProcessHandle::spawn(&ProgramSpec::new("/nonexistent/warden-test-binary"));
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }
}
