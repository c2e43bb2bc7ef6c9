//! Error types for agentdock-core

use thiserror::Error;

/// Main error type for SDK operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Disconnected")]
    Disconnected,

    #[error("Failed to launch agent: {0}")]
    LaunchFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Child processes are not supported on this platform")]
    UnsupportedPlatform,
}

/// Errors decoded from JSON-RPC error frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Agent returned error {code}: {message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Missing result in {method} response")]
    MissingResult { method: String },
}

/// Session-engine errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No active session")]
    NoActiveSession,

    #[error("Not initialized")]
    NotInitialized,

    #[error("Capability not advertised by agent: {0}")]
    CapabilityNotSupported(String),

    #[error("No agent name available")]
    NoAgentName,
}

/// Wire decoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed frame: {preview}")]
    MalformedFrame { preview: String },
}

impl CodecError {
    /// Build a malformed-frame error with the raw payload truncated for logs.
    pub fn malformed(raw: &str) -> Self {
        let preview: String = raw.chars().take(200).collect();
        Self::MalformedFrame { preview }
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
