//! Handshake and telemetry vocabulary
//!
//! Children report their bring-up with a status record (`{"status": "ok"}`,
//! `{"status": "started"}` or `{"status": "error", "message": ...}`). Control
//! and telemetry signals travel as bare strings (`"stop"`, `"request"`).
//! Anything else is an application payload and is forwarded untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Message used when a child fails without saying why
pub const UNKNOWN_ERROR: &str = "an unknown error has occurred";

/// Status carried by a handshake record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeStatus {
    /// Single-child bring-up succeeded
    Ok,
    /// Pool worker bring-up succeeded
    Started,
    /// Bring-up (or a later operation) failed
    Error,
}

impl fmt::Display for HandshakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeStatus::Ok => write!(f, "ok"),
            HandshakeStatus::Started => write!(f, "started"),
            HandshakeStatus::Error => write!(f, "error"),
        }
    }
}

/// `{status, message?}` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: HandshakeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusMessage {
    pub fn ok() -> Self {
        Self {
            status: HandshakeStatus::Ok,
            message: None,
        }
    }

    pub fn started() -> Self {
        Self {
            status: HandshakeStatus::Started,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HandshakeStatus::Error,
            message: Some(message.into()),
        }
    }

    /// Error text, falling back to [`UNKNOWN_ERROR`]
    pub fn error_text(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string())
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::json!(self)
    }
}

/// Bare string control/telemetry signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// Parent to child: begin graceful shutdown
    Stop,
    /// Child to parent: one unit of work completed
    Request,
}

impl Sentinel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentinel::Stop => "stop",
            Sentinel::Request => "request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(Sentinel::Stop),
            "request" => Some(Sentinel::Request),
            _ => None,
        }
    }

    pub fn to_value(&self) -> JsonValue {
        JsonValue::String(self.as_str().to_string())
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message received over the channel, classified by shape
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(StatusMessage),
    Sentinel(Sentinel),
    Payload(JsonValue),
}

impl ChannelMessage {
    /// Classify a raw message value
    pub fn classify(value: JsonValue) -> Self {
        match &value {
            JsonValue::String(s) => match Sentinel::parse(s) {
                Some(sentinel) => ChannelMessage::Sentinel(sentinel),
                None => ChannelMessage::Payload(value),
            },
            JsonValue::Object(map) if map.contains_key("status") => {
                match serde_json::from_value::<StatusMessage>(value.clone()) {
                    Ok(status) => ChannelMessage::Status(status),
                    Err(_) => ChannelMessage::Payload(value),
                }
            }
            _ => ChannelMessage::Payload(value),
        }
    }

    /// Error text if this is a `{status: "error"}` record
    pub fn error_message(&self) -> Option<String> {
        match self {
            ChannelMessage::Status(status) if status.status == HandshakeStatus::Error => {
                Some(status.error_text())
            }
            _ => None,
        }
    }

    pub fn is_sentinel(&self, sentinel: Sentinel) -> bool {
        matches!(self, ChannelMessage::Sentinel(s) if *s == sentinel)
    }

    pub fn into_value(self) -> JsonValue {
        match self {
            ChannelMessage::Status(status) => status.to_value(),
            ChannelMessage::Sentinel(sentinel) => sentinel.to_value(),
            ChannelMessage::Payload(value) => value,
        }
    }
}

/// Message envelope carrying protocol metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
