//! Inter-process communication for warden
//!
//! This crate provides the handshake vocabulary and the line-delimited JSON
//! framing shared by supervisors (parent side) and supervised children.

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::{IpcError, IpcResult};
pub use protocol::{
    ChannelMessage, HandshakeStatus, MessageEnvelope, Sentinel, StatusMessage,
    IPC_PROTOCOL_VERSION, UNKNOWN_ERROR,
};
pub use transport::{IpcReader, IpcWriter};

/// Environment variable a supervisor sets so the child knows it is attached
pub const CHANNEL_ENV: &str = "WARDEN_CHANNEL";

/// Value of [`CHANNEL_ENV`] for the stdin/stdout channel
pub const CHANNEL_STDIO: &str = "stdio";

/// Environment variable carrying a pool worker's identity
pub const WORKER_ID_ENV: &str = "WARDEN_WORKER_ID";
