//! ACP (Agent Client Protocol) implementation
//!
//! Host side of the protocol: the application drives an external coding
//! agent over JSON-RPC, either through the stdio pipes of a spawned child
//! process or an HTTP endpoint.
//!
//! # Architecture
//!
//! - `codec` - frame encoding and classification
//! - `Transport` - full-duplex frame channel (`ProcessTransport`, `HttpTransport`)
//! - `Router` - request/response correlation and inbound dispatch
//! - `AcpClient` - the session engine the application talks to
//! - `AcpDelegate` - the application's inbound hooks

pub mod codec;
mod client;
mod delegate;
mod http;
mod merger;
mod router;
mod session;
mod transport;

pub use client::AcpClient;
pub use codec::{IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
pub use delegate::{AcpDelegate, DelegateError, DelegateResult, NullDelegate};
pub use http::HttpTransport;
pub use merger::UpdateMerger;
pub use router::{Inbound, Router};
pub use session::{PromptStats, SessionState};
pub use transport::{ProcessConfig, ProcessTransport, Transport};
