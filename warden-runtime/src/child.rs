//! Lifecycle driver for supervised programs

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use warden_ipc::{ChannelMessage, IpcError, IpcResult, Sentinel, StatusMessage};
use warden_resilience::{SignalListener, TerminationSignal};

use crate::link::{LinkWriter, ParentLink};

/// A program run under a warden supervisor
#[async_trait]
pub trait ChildProcess: Send {
    /// Bring the program up. An error is reported to the parent as the
    /// handshake failure message.
    async fn start(&mut self, ctx: &ChildContext) -> anyhow::Result<()>;

    /// Shut the program down after a stop trigger
    async fn stop(&mut self, ctx: &ChildContext) -> anyhow::Result<()>;

    /// An application message from the parent arrived
    async fn on_message(&mut self, ctx: &ChildContext, message: JsonValue) -> anyhow::Result<()> {
        debug!("{} ignoring message {}", ctx.title(), message);
        Ok(())
    }
}

/// What ended the wait after a successful start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    /// The parent sent `"stop"`
    Sentinel,
    /// The parent closed the channel
    Disconnect,
    Signal(TerminationSignal),
}

impl fmt::Display for StopTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopTrigger::Sentinel => write!(f, "stop requested"),
            StopTrigger::Disconnect => write!(f, "parent disconnected"),
            StopTrigger::Signal(signal) => write!(f, "{}", signal),
        }
    }
}

/// Handle passed to a [`ChildProcess`] for talking to the parent
#[derive(Clone)]
pub struct ChildContext {
    title: String,
    link: Option<LinkWriter>,
}

impl ChildContext {
    /// A context with no parent; sends fail with [`IpcError::NotConnected`]
    pub fn detached(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: None,
        }
    }

    fn attached(title: impl Into<String>, link: LinkWriter) -> Self {
        Self {
            title: title.into(),
            link: Some(link),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    pub async fn send(&self, message: JsonValue) -> IpcResult<()> {
        match &self.link {
            Some(link) => link.send(&message).await,
            None => Err(IpcError::NotConnected),
        }
    }

    /// Report one served request (counts towards pool recycling)
    pub async fn request(&self) -> IpcResult<()> {
        self.send(Sentinel::Request.to_value()).await
    }

    async fn report(&self, status: StatusMessage) {
        if !self.is_attached() {
            return;
        }
        if let Err(e) = self.send(status.to_value()).await {
            warn!("Failed to report {} to parent: {}", status.status, e);
        }
    }
}

/// Run a single supervised child. Returns the process exit code.
pub async fn run_child<P: ChildProcess>(title: &str, process: P) -> i32 {
    serve(title, process, ParentLink::connect(), StatusMessage::ok()).await
}

/// Run a pool worker. Returns the process exit code.
pub async fn run_worker<P: ChildProcess>(title: &str, process: P) -> i32 {
    serve(title, process, ParentLink::connect(), StatusMessage::started()).await
}

/// Drive `process` over an explicit link, handshaking with `ready` on success
pub async fn serve<P: ChildProcess>(
    title: &str,
    mut process: P,
    link: Option<ParentLink>,
    ready: StatusMessage,
) -> i32 {
    let span = info_span!("child", title = %title);
    async move {
        let (ctx, mut inbound) = match link {
            Some(link) => {
                let (writer, inbound) = link.split();
                (ChildContext::attached(title, writer), Some(inbound))
            }
            None => (ChildContext::detached(title), None),
        };

        // Installing the listener also keeps unwanted signals from killing us
        let mut signals = match SignalListener::install() {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("Failed to install signal handlers: {}", e);
                None
            }
        };

        if let Err(e) = process.start(&ctx).await {
            error!("Failed to start: {:#}", e);
            ctx.report(StatusMessage::error(e.to_string())).await;
            return 1;
        }
        ctx.report(ready).await;
        info!("Started");

        let trigger = wait_for_stop(&ctx, &mut process, &mut inbound, signals.as_mut()).await;
        info!("Stopping: {}", trigger);

        match process.stop(&ctx).await {
            Ok(()) => {
                info!("Stopped");
                0
            }
            Err(e) => {
                error!("Failed to stop: {:#}", e);
                ctx.report(StatusMessage::error(e.to_string())).await;
                1
            }
        }
    }
    .instrument(span)
    .await
}

async fn wait_for_stop<P: ChildProcess>(
    ctx: &ChildContext,
    process: &mut P,
    inbound: &mut Option<mpsc::UnboundedReceiver<ChannelMessage>>,
    mut signals: Option<&mut SignalListener>,
) -> StopTrigger {
    // An attached child leaves SIGTERM and SIGINT to its parent
    let wanted: &[TerminationSignal] = if ctx.is_attached() {
        &[TerminationSignal::Hangup]
    } else {
        &[
            TerminationSignal::Hangup,
            TerminationSignal::Terminate,
            TerminationSignal::Interrupt,
        ]
    };

    loop {
        tokio::select! {
            message = next_message(inbound) => match message {
                Some(ChannelMessage::Sentinel(Sentinel::Stop)) => return StopTrigger::Sentinel,
                Some(ChannelMessage::Payload(message)) => {
                    if let Err(e) = process.on_message(ctx, message).await {
                        warn!("Failed to handle message: {:#}", e);
                    }
                }
                Some(other) => debug!("Ignoring {:?} from parent", other),
                None => return StopTrigger::Disconnect,
            },
            signal = next_signal(signals.as_deref_mut(), wanted) => {
                return StopTrigger::Signal(signal);
            }
        }
    }
}

async fn next_message(
    inbound: &mut Option<mpsc::UnboundedReceiver<ChannelMessage>>,
) -> Option<ChannelMessage> {
    match inbound {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_signal(
    signals: Option<&mut SignalListener>,
    wanted: &[TerminationSignal],
) -> TerminationSignal {
    match signals {
        Some(listener) => listener.recv_matching(wanted).await,
        None => std::future::pending().await,
    }
}

/// Run a one-shot task and report its outcome. Returns the process exit code.
///
/// Termination signals are ignored while the task runs.
pub async fn run_once<F, Fut>(title: &str, task: F) -> i32
where
    F: FnOnce(ChildContext) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let span = info_span!("child", title = %title);
    async move {
        let ctx = match ParentLink::connect() {
            Some(link) => ChildContext::attached(title, link.writer()),
            None => ChildContext::detached(title),
        };

        let _signals = match SignalListener::install() {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("Failed to install signal handlers: {}", e);
                None
            }
        };

        match task(ctx.clone()).await {
            Ok(()) => {
                info!("Finished");
                ctx.report(StatusMessage::ok()).await;
                0
            }
            Err(e) => {
                error!("Failed: {:#}", e);
                ctx.report(StatusMessage::error(e.to_string())).await;
                1
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
    use warden_ipc::MessageEnvelope;

    #[derive(Default)]
    struct Recorder {
        fail_start: Option<&'static str>,
        fail_stop: Option<&'static str>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ChildProcess for Recorder {
        async fn start(&mut self, _ctx: &ChildContext) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push("start".into());
            match self.fail_start {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(()),
            }
        }

        async fn stop(&mut self, _ctx: &ChildContext) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push("stop".into());
            match self.fail_stop {
                Some(message) => Err(anyhow::anyhow!(message)),
                None => Ok(()),
            }
        }

        async fn on_message(&mut self, ctx: &ChildContext, message: JsonValue) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(message.to_string());
            ctx.request().await?;
            Ok(())
        }
    }

    struct Parent {
        to_child: DuplexStream,
        from_child: Lines<BufReader<DuplexStream>>,
    }

    impl Parent {
        async fn send(&mut self, message: JsonValue) {
            let frame = serde_json::to_string(&MessageEnvelope::new(message)).unwrap();
            self.to_child
                .write_all(format!("{}\n", frame).as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> JsonValue {
            let line = self.from_child.next_line().await.unwrap().unwrap();
            serde_json::from_str::<MessageEnvelope<JsonValue>>(&line)
                .unwrap()
                .message
        }
    }

    fn pipes() -> (ParentLink, Parent) {
        let (to_child, child_in) = duplex(4096);
        let (child_out, from_child) = duplex(4096);
        let parent = Parent {
            to_child,
            from_child: BufReader::new(from_child).lines(),
        };
        (ParentLink::from_io(child_in, child_out), parent)
    }

    #[tokio::test]
    async fn test_handshake_and_stop_sentinel() {
        let (link, mut parent) = pipes();
        let recorder = Recorder::default();
        let seen = Arc::clone(&recorder.seen);

        let child = tokio::spawn(async move {
            serve("test", recorder, Some(link), StatusMessage::ok()).await
        });

        assert_eq!(parent.recv().await, json!({"status": "ok"}));
        parent.send(json!({"job": 1})).await;
        assert_eq!(parent.recv().await, json!("request"));
        parent.send(json!("stop")).await;

        assert_eq!(child.await.unwrap(), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["start", r#"{"job":1}"#, "stop"]);
    }

    #[tokio::test]
    async fn test_worker_handshake_vocabulary() {
        let (link, mut parent) = pipes();
        let child = tokio::spawn(async move {
            serve("test", Recorder::default(), Some(link), StatusMessage::started()).await
        });

        assert_eq!(parent.recv().await, json!({"status": "started"}));
        drop(parent.to_child);
        assert_eq!(child.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let (link, mut parent) = pipes();
        let recorder = Recorder {
            fail_start: Some("bar"),
            ..Default::default()
        };

        let code = serve("test", recorder, Some(link), StatusMessage::ok()).await;
        assert_eq!(code, 1);
        assert_eq!(
            parent.recv().await,
            json!({"status": "error", "message": "bar"})
        );
    }

    #[tokio::test]
    async fn test_stop_failure_is_reported() {
        let (link, mut parent) = pipes();
        let recorder = Recorder {
            fail_stop: Some("cleanup failed"),
            ..Default::default()
        };
        let child = tokio::spawn(async move {
            serve("test", recorder, Some(link), StatusMessage::ok()).await
        });

        assert_eq!(parent.recv().await, json!({"status": "ok"}));
        parent.send(json!("stop")).await;
        assert_eq!(
            parent.recv().await,
            json!({"status": "error", "message": "cleanup failed"})
        );
        assert_eq!(child.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_detached_context() {
        let ctx = ChildContext::detached("solo");
        assert!(!ctx.is_attached());
        assert_eq!(ctx.title(), "solo");
        assert!(matches!(ctx.request().await, Err(IpcError::NotConnected)));
    }

    #[test]
    fn test_stop_trigger_display() {
        assert_eq!(StopTrigger::Sentinel.to_string(), "stop requested");
        assert_eq!(
            StopTrigger::Signal(TerminationSignal::Hangup).to_string(),
            "SIGHUP"
        );
    }
}
