//! IPC transport over any async byte stream
//!
//! Frames are newline-delimited JSON [`MessageEnvelope`]s. The read and write
//! halves are separate types so a supervisor can pump a child's stdout while
//! another task writes to its stdin.

use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Writing half of a channel
pub struct IpcWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> IpcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send a message, wrapped in an envelope
    pub async fn send(&mut self, message: &JsonValue) -> Result<(), IpcError> {
        let envelope = MessageEnvelope::new(message);
        let json = serde_json::to_string(&envelope)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;

        // Send with newline delimiter
        let message_with_newline = format!("{}\n", json);
        self.inner.write_all(message_with_newline.as_bytes()).await?;
        self.inner.flush().await?;

        Ok(())
    }

    /// Flush and shut down the underlying stream
    pub async fn close(mut self) -> Result<(), IpcError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Reading half of a channel
///
/// The buffered reader and the pending line live as long as the channel so
/// partial lines are never lost between calls.
pub struct IpcReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> IpcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: Vec::new(),
        }
    }

    /// Receive the next message. `Ok(None)` means end of stream.
    ///
    /// A malformed line, including one that is not UTF-8, yields a frame
    /// error and leaves the reader usable.
    /// Cancel safe: bytes of a partially read line stay in `self.line`.
    pub async fn receive(&mut self) -> Result<Option<JsonValue>, IpcError> {
        loop {
            let read = self.inner.read_until(b'\n', &mut self.line).await?;
            if read == 0 && self.line.is_empty() {
                return Ok(None);
            }

            let raw = std::mem::take(&mut self.line);
            let line = String::from_utf8(raw)
                .map_err(|e| IpcError::DeserializationError(format!("invalid UTF-8: {}", e)))?;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let envelope: MessageEnvelope<JsonValue> = serde_json::from_str(line)
                .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

            if !envelope.is_compatible() {
                return Err(IpcError::ProtocolVersionMismatch {
                    expected: IPC_PROTOCOL_VERSION,
                    actual: envelope.protocol_version,
                });
            }

            return Ok(Some(envelope.message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = IpcWriter::new(client);
        let mut reader = IpcReader::new(server);

        writer.send(&json!({"status": "ok"})).await.unwrap();
        writer.send(&json!("request")).await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(reader.receive().await.unwrap(), Some(json!({"status": "ok"})));
        assert_eq!(reader.receive().await.unwrap(), Some(json!("request")));
        assert_eq!(reader.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_line_is_skippable() {
        let (mut raw, server) = tokio::io::duplex(1024);
        let mut reader = IpcReader::new(server);

        raw.write_all(b"listening on port 3000\n").await.unwrap();
        let envelope = serde_json::to_string(&MessageEnvelope::new(json!("stop"))).unwrap();
        raw.write_all(format!("{}\n", envelope).as_bytes()).await.unwrap();
        drop(raw);

        let err = reader.receive().await.unwrap_err();
        assert!(err.is_frame_error());
        assert_eq!(reader.receive().await.unwrap(), Some(json!("stop")));
        assert_eq!(reader.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_non_utf8_line_is_skippable() {
        let (mut raw, server) = tokio::io::duplex(1024);
        let mut reader = IpcReader::new(server);

        raw.write_all(b"\xff\xfe\n").await.unwrap();
        let envelope = serde_json::to_string(&MessageEnvelope::new(json!({"status": "ok"}))).unwrap();
        raw.write_all(format!("{}\n", envelope).as_bytes()).await.unwrap();
        drop(raw);

        let err = reader.receive().await.unwrap_err();
        assert!(err.is_frame_error());
        assert_eq!(reader.receive().await.unwrap(), Some(json!({"status": "ok"})));
        assert_eq!(reader.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (mut raw, server) = tokio::io::duplex(1024);
        let mut reader = IpcReader::new(server);

        raw.write_all(b"{\"protocol_version\":99,\"timestamp\":\"2024-01-01T00:00:00Z\",\"message\":\"stop\"}\n")
            .await
            .unwrap();

        match reader.receive().await {
            Err(IpcError::ProtocolVersionMismatch { expected, actual }) => {
                assert_eq!(expected, IPC_PROTOCOL_VERSION);
                assert_eq!(actual, 99);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_line_survives_between_reads() {
        let (mut raw, server) = tokio::io::duplex(1024);
        let mut reader = IpcReader::new(server);

        let envelope = serde_json::to_string(&MessageEnvelope::new(json!("request"))).unwrap();
        let (head, tail) = envelope.split_at(10);

        raw.write_all(head.as_bytes()).await.unwrap();
        let pending = tokio::spawn(async move { reader.receive().await.unwrap() });
        tokio::task::yield_now().await;
        raw.write_all(format!("{}\n", tail).as_bytes()).await.unwrap();

        assert_eq!(pending.await.unwrap(), Some(json!("request")));
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        let first = serde_json::to_string(&MessageEnvelope::new(json!({"status": "started"}))).unwrap();
        let second = serde_json::to_string(&MessageEnvelope::new(json!("request"))).unwrap();
        let third = serde_json::to_string(&MessageEnvelope::new(json!("request"))).unwrap();
        let (head, tail) = first.split_at(first.len() / 2);

        let stream = tokio_test::io::Builder::new()
            .read(head.as_bytes())
            .read(format!("{}\n{}\n", tail, second).as_bytes())
            .read(format!("\n{}\n", third).as_bytes())
            .build();
        let mut reader = IpcReader::new(stream);

        assert_eq!(reader.receive().await.unwrap(), Some(json!({"status": "started"})));
        assert_eq!(reader.receive().await.unwrap(), Some(json!("request")));
        assert_eq!(reader.receive().await.unwrap(), Some(json!("request")));
        assert_eq!(reader.receive().await.unwrap(), None);
    }
}
