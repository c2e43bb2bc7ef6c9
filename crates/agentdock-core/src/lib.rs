//! agentdock-core
//!
//! Host-side SDK for the Agent Client Protocol (ACP): a bidirectional
//! JSON-RPC engine that lets an editor or IDE drive an external AI coding
//! agent running as a child process or behind an HTTP endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      agentdock-core                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  acp/codec     - JSON-RPC frames, ids, classification       │
//! │  acp/transport - child-process stdio transport              │
//! │  acp/http      - HTTP POST + poll transport                 │
//! │  acp/router    - request correlation, inbound dispatch      │
//! │  acp/merger    - streaming update batching                  │
//! │  acp/client    - session engine (the public surface)        │
//! │  types/        - wire and shared type definitions           │
//! │  config.rs     - env-driven settings                        │
//! │  error.rs      - error taxonomy                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use agentdock_core::{AcpClient, NullDelegate, ProcessConfig, ProcessTransport, Settings};
//! use std::sync::Arc;
//!
//! # async fn run() -> agentdock_core::Result<()> {
//! let transport = Arc::new(ProcessTransport::new(ProcessConfig {
//!     command: "my-agent".into(),
//!     args: vec!["--acp".into()],
//!     working_dir: "/tmp".into(),
//! }));
//! let client = AcpClient::new(transport, Arc::new(NullDelegate), Settings::from_env());
//!
//! client.connect().await?;
//! client.new_session("/tmp", Vec::new(), None, None).await?;
//! let response = client.prompt_text("hello").await?;
//! println!("stop reason: {:?}", response.stop_reason);
//! # Ok(())
//! # }
//! ```

pub mod acp;
pub mod config;
pub mod error;
pub mod types;

pub use config::Settings;
pub use error::{CodecError, Error, ProtocolError, Result, SessionError, TransportError};
pub use types::*;

pub use acp::{
    // Engine and hooks
    AcpClient, AcpDelegate, DelegateError, DelegateResult, NullDelegate,
    // Transports
    HttpTransport, ProcessConfig, ProcessTransport, Transport,
    // Lower layers
    IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, Router,
};
