//! The child's end of the channel to its supervisor

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};
use warden_ipc::{ChannelMessage, IpcReader, IpcResult, IpcWriter, CHANNEL_ENV, CHANNEL_STDIO};

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Cloneable writer for frames to the parent
#[derive(Clone)]
pub struct LinkWriter {
    inner: Arc<Mutex<IpcWriter<BoxedWriter>>>,
}

impl LinkWriter {
    pub async fn send(&self, message: &JsonValue) -> IpcResult<()> {
        let mut writer = self.inner.lock().await;
        writer.send(message).await
    }
}

/// Connection to the supervising parent
pub struct ParentLink {
    writer: LinkWriter,
    inbound: mpsc::UnboundedReceiver<ChannelMessage>,
}

impl ParentLink {
    /// Whether this process was spawned by a warden supervisor
    pub fn is_attached() -> bool {
        std::env::var(CHANNEL_ENV)
            .map(|value| value == CHANNEL_STDIO)
            .unwrap_or(false)
    }

    /// Connect over stdin/stdout, or `None` when not attached.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect() -> Option<Self> {
        if !Self::is_attached() {
            debug!("{} not set, running detached", CHANNEL_ENV);
            return None;
        }
        Some(Self::from_io(tokio::io::stdin(), tokio::io::stdout()))
    }

    /// Build a link over arbitrary streams
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(pump_inbound(IpcReader::new(reader), inbound_tx));

        let boxed: BoxedWriter = Box::new(writer);
        Self {
            writer: LinkWriter {
                inner: Arc::new(Mutex::new(IpcWriter::new(boxed))),
            },
            inbound,
        }
    }

    pub fn writer(&self) -> LinkWriter {
        self.writer.clone()
    }

    /// Next message from the parent; `None` once the parent disconnected
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.inbound.recv().await
    }

    pub fn split(self) -> (LinkWriter, mpsc::UnboundedReceiver<ChannelMessage>) {
        (self.writer, self.inbound)
    }
}

async fn pump_inbound<R: AsyncRead + Unpin>(
    mut reader: IpcReader<R>,
    inbound: mpsc::UnboundedSender<ChannelMessage>,
) {
    loop {
        match reader.receive().await {
            Ok(Some(message)) => {
                trace!("Received {} from parent", message);
                if inbound.send(ChannelMessage::classify(message)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("Parent disconnected");
                return;
            }
            Err(e) if e.is_frame_error() => warn!("Skipping malformed frame from parent: {}", e),
            Err(e) => {
                debug!("Channel from parent failed: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};
    use warden_ipc::{MessageEnvelope, Sentinel};

    #[tokio::test]
    async fn test_inbound_is_classified() {
        let (mut parent_out, child_in) = duplex(4096);
        let (child_out, _parent_in) = duplex(4096);
        let mut link = ParentLink::from_io(child_in, child_out);

        let stop = serde_json::to_string(&MessageEnvelope::new(json!("stop"))).unwrap();
        let payload = serde_json::to_string(&MessageEnvelope::new(json!({"job": 7}))).unwrap();
        parent_out
            .write_all(format!("garbage\n{}\n{}\n", payload, stop).as_bytes())
            .await
            .unwrap();
        drop(parent_out);

        assert_eq!(link.recv().await, Some(ChannelMessage::Payload(json!({"job": 7}))));
        assert_eq!(link.recv().await, Some(ChannelMessage::Sentinel(Sentinel::Stop)));
        assert_eq!(link.recv().await, None);
    }

    #[tokio::test]
    async fn test_writer_frames_messages() {
        let (_parent_out, child_in) = duplex(4096);
        let (child_out, parent_in) = duplex(4096);
        let link = ParentLink::from_io(child_in, child_out);

        let writer = link.writer();
        writer.send(&json!("request")).await.unwrap();
        link.writer().send(&json!({"status": "ok"})).await.unwrap();

        let mut lines = BufReader::new(parent_in).lines();
        let first: MessageEnvelope<JsonValue> =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        let second: MessageEnvelope<JsonValue> =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.message, json!("request"));
        assert_eq!(second.message, json!({"status": "ok"}));
    }
}
