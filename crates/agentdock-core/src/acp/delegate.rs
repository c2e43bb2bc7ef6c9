//! Delegate contract: the host application's inbound hooks
//!
//! The agent may ask for permissions, file access and tool execution; the
//! engine services those requests through this trait. Every hook has a
//! refusing default so applications implement only what they need.

use crate::types::{CallToolResponse, RequestPermissionParams, SessionUpdate, ToolDefinition};
use async_trait::async_trait;
use thiserror::Error;

/// Failure surfaced by a delegate hook.
///
/// `NotImplemented` is the defaults' refusal and maps to protocol-level
/// "unsupported" answers; `Failed` carries a real delegate error.
#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("delegate hook not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("{0}")]
    Failed(String),
}

impl DelegateError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type DelegateResult<T> = std::result::Result<T, DelegateError>;

/// Host application hooks, invoked on the engine's context.
#[async_trait]
pub trait AcpDelegate: Send + Sync {
    /// Streaming update sink. Receives one coalesced record per batch
    /// window, or every notification verbatim when batching is disabled.
    async fn on_update(&self, update: SessionUpdate) {
        let _ = update;
    }

    /// Pick a permission option id for a session/request_permission request.
    async fn choose_permission(
        &self,
        request: RequestPermissionParams,
    ) -> DelegateResult<String> {
        let _ = request;
        Err(DelegateError::NotImplemented("choose_permission"))
    }

    async fn read_file(&self, path: &str) -> DelegateResult<String> {
        let _ = path;
        Err(DelegateError::NotImplemented("read_file"))
    }

    async fn write_file(&self, path: &str, content: &str) -> DelegateResult<()> {
        let _ = (path, content);
        Err(DelegateError::NotImplemented("write_file"))
    }

    async fn list_tools(&self) -> DelegateResult<Vec<ToolDefinition>> {
        Err(DelegateError::NotImplemented("list_tools"))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> DelegateResult<CallToolResponse> {
        let _ = (name, arguments);
        Err(DelegateError::NotImplemented("call_tool"))
    }
}

/// Delegate that refuses everything; useful for probing agents.
pub struct NullDelegate;

#[async_trait]
impl AcpDelegate for NullDelegate {}
