//! IPC error types

use thiserror::Error;

/// IPC result type
pub type IpcResult<T> = Result<T, IpcError>;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// Transport not connected
    #[error("Transport not connected")]
    NotConnected,
}

impl IpcError {
    /// A frame-level problem; the channel itself is still usable
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            IpcError::DeserializationError(_) | IpcError::ProtocolVersionMismatch { .. }
        )
    }

    /// The channel is gone and no further frames will arrive
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::IoError(_) | IpcError::ConnectionClosed | IpcError::NotConnected
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => {
                IpcError::ConnectionClosed
            }
            _ => IpcError::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_errors_are_not_fatal() {
        assert!(IpcError::DeserializationError("bad line".to_string()).is_frame_error());
        assert!(IpcError::ProtocolVersionMismatch { expected: 1, actual: 2 }.is_frame_error());
        assert!(!IpcError::DeserializationError("bad line".to_string()).is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(IpcError::ConnectionClosed.is_fatal());
        assert!(IpcError::IoError("reset".to_string()).is_fatal());
        assert!(!IpcError::ConnectionClosed.is_frame_error());
    }

    #[test]
    fn test_broken_pipe_maps_to_closed() {
        let err: IpcError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, IpcError::ConnectionClosed));
    }
}
