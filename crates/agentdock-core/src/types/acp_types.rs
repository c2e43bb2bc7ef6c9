//! ACP (Agent Client Protocol) wire type definitions
//!
//! Request/response payloads follow the protocol's camelCase field naming.
//! Fields the protocol leaves schema-opaque (`_meta`, tool arguments,
//! permission content) are kept as `serde_json::Value`.

use super::{AvailableCommand, ContentBlock, Plan, ToolCallSnapshot, ToolCallStatus};
use serde::{de, Deserialize, Deserializer, Serialize};

/// Protocol version preferred by this client
pub const PROTOCOL_VERSION: u16 = 1;

/// Client information sent during initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "agentdock".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Structured protocol version, sent alongside the integer form.
///
/// Some agents negotiate on the integer, some on the structured list; the
/// initialize request carries both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

/// Client capabilities declared during initialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
}

impl ClientCapabilities {
    /// Capabilities this SDK services through the delegate hooks.
    pub fn standard() -> Self {
        Self {
            fs: Some(FsCapabilities {
                read_text_file: true,
                write_text_file: true,
            }),
            terminal: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FsCapabilities {
    #[serde(default)]
    pub read_text_file: bool,
    #[serde(default)]
    pub write_text_file: bool,
}

/// Agent capabilities received during initialization
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub load_session: bool,
    #[serde(default)]
    pub prompt_capabilities: PromptCapabilities,
    /// Advertised MCP server configurations, kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_capabilities: Option<serde_json::Value>,
}

/// Prompt-input modalities the agent accepts; text is always implied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    #[serde(default)]
    pub image: bool,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub embedded_context: bool,
}

/// Agent identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Authentication method advertised by the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMethod {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Initialize request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: u16,
    pub supported_versions: Vec<ProtocolVersion>,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// Initialize response
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    #[serde(default)]
    pub protocol_version: u16,
    #[serde(default)]
    pub agent_info: Option<AgentInfo>,
    /// Standard agents send `agentCapabilities`; some send `capabilities`.
    #[serde(default, alias = "capabilities")]
    pub agent_capabilities: AgentCapabilities,
    #[serde(default)]
    pub auth_methods: Vec<AuthMethod>,
}

/// MCP server configuration passed through on session creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "camelCase")]
pub enum McpServerConfig {
    Stdio {
        name: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: std::collections::HashMap<String, String>,
    },
    Http {
        name: String,
        url: String,
        #[serde(default)]
        headers: std::collections::HashMap<String, String>,
    },
}

/// Session mode descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Session model descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModel {
    #[serde(alias = "modelId")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Available modes plus the currently selected one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeState {
    #[serde(default)]
    pub available_modes: Vec<SessionMode>,
    #[serde(default)]
    pub current_mode_id: Option<String>,
}

/// Available models plus the currently selected one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelState {
    #[serde(default)]
    pub available_models: Vec<SessionModel>,
    #[serde(default)]
    pub current_model_id: Option<String>,
}

/// session/new request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    pub cwd: String,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// session/new response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    pub session_id: String,
    #[serde(default)]
    pub modes: Option<ModeState>,
    #[serde(default)]
    pub models: Option<ModelState>,
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// session/load request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionParams {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServerConfig>,
}

/// session/load response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionResponse {
    pub session_id: String,
    #[serde(default)]
    pub modes: Option<ModeState>,
    #[serde(default)]
    pub models: Option<ModelState>,
    /// Replayed conversation history, when the agent provides it.
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

/// A message replayed from a loaded session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
    System,
}

/// session/prompt request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    pub session_id: String,
    pub prompt: Vec<ContentBlock>,
}

/// session/prompt response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
}

/// session/cancel notification parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    pub session_id: String,
}

/// session/set_mode request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModeParams {
    pub session_id: String,
    pub mode_id: String,
}

/// session/set_model request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModelParams {
    pub session_id: String,
    pub model_id: String,
}

/// authenticate request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateParams {
    pub method_id: String,
}

/// agents/get request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsGetParams {
    pub name: String,
}

/// Agent manifest returned by agents/get
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentManifest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub input_content_types: Vec<String>,
    #[serde(default)]
    pub output_content_types: Vec<String>,
}

// === Inbound requests (agent asks the host) ===

/// The option id used to decline a permission request when no chooser is
/// available.
pub const REJECT_ONCE_OPTION: &str = "reject_once";

/// session/request_permission parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Current tool-call context; agents may send either or both forms.
    /// Passed to the delegate untouched.
    #[serde(default)]
    pub tool_call: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    pub options: Vec<PermissionOption>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    pub option_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: Option<PermissionOptionKind>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
}

/// session/request_permission response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPermissionResponse {
    pub outcome: PermissionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    Selected {
        #[serde(rename = "optionId")]
        option_id: String,
    },
    Cancelled,
}

/// fs/read_text_file parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsReadTextFileParams {
    #[serde(default)]
    pub session_id: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsReadTextFileResponse {
    pub content: String,
}

/// fs/write_text_file parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsWriteTextFileParams {
    #[serde(default)]
    pub session_id: Option<String>,
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsWriteTextFileResponse {
    pub success: bool,
}

/// Tool descriptor returned from tools/list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON-schema-shaped parameter declaration.
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResponse {
    pub tools: Vec<ToolDefinition>,
}

/// tools/call parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// tools/call response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResponse {
    pub success: bool,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

// === Streaming updates ===

/// Coalesced update record delivered to the delegate.
///
/// Message chunks and tool calls accumulate in arrival order; plan, commands
/// and modes hold the latest value seen in the merge window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionUpdate {
    pub message_chunks: Vec<ContentBlock>,
    pub tool_calls: Vec<ToolCallSnapshot>,
    pub plan: Option<Plan>,
    pub commands: Option<Vec<AvailableCommand>>,
    pub modes: Option<ModeState>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.message_chunks.is_empty()
            && self.tool_calls.is_empty()
            && self.plan.is_none()
            && self.commands.is_none()
            && self.modes.is_none()
    }

    /// Fold `other` into this record: lists append, snapshots overwrite.
    pub fn merge(&mut self, other: SessionUpdate) {
        self.message_chunks.extend(other.message_chunks);
        self.tool_calls.extend(other.tool_calls);
        if other.plan.is_some() {
            self.plan = other.plan;
        }
        if other.commands.is_some() {
            self.commands = other.commands;
        }
        if other.modes.is_some() {
            self.modes = other.modes;
        }
    }
}

/// Explicit tagged form of a session/update payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum UpdateEvent {
    AgentMessageChunk {
        content: ContentBlock,
    },
    UserMessageChunk {
        content: ContentBlock,
    },
    #[serde(alias = "agent_thought_chunk")]
    Thought {
        content: ContentBlock,
    },
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        kind: Option<String>,
        status: ToolCallStatus,
        #[serde(default, rename = "rawInput")]
        raw_input: Option<serde_json::Value>,
    },
    ToolCallUpdate {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        status: ToolCallStatus,
        #[serde(default, rename = "rawOutput")]
        raw_output: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Plan(Plan),
    CurrentModeUpdate {
        #[serde(rename = "currentModeId", alias = "modeId")]
        current_mode_id: String,
    },
    AvailableCommandsUpdate {
        #[serde(rename = "availableCommands")]
        available_commands: Vec<AvailableCommand>,
    },
}

impl UpdateEvent {
    /// Convert a single tagged event into the merged record form.
    pub fn into_update(self) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        match self {
            Self::AgentMessageChunk { content }
            | Self::UserMessageChunk { content }
            | Self::Thought { content } => update.message_chunks.push(content),
            Self::ToolCall {
                tool_call_id,
                title,
                kind,
                status,
                raw_input,
            } => update.tool_calls.push(ToolCallSnapshot {
                id: tool_call_id,
                title: title.or(kind),
                status,
                raw_input,
                result: None,
                error: None,
            }),
            Self::ToolCallUpdate {
                tool_call_id,
                status,
                raw_output,
                error,
            } => update.tool_calls.push(ToolCallSnapshot {
                id: tool_call_id,
                title: None,
                status,
                raw_input: None,
                result: raw_output,
                error,
            }),
            Self::Plan(plan) => update.plan = Some(plan),
            Self::CurrentModeUpdate { current_mode_id } => {
                update.modes = Some(ModeState {
                    available_modes: Vec::new(),
                    current_mode_id: Some(current_mode_id),
                })
            }
            Self::AvailableCommandsUpdate { available_commands } => {
                update.commands = Some(available_commands)
            }
        }
        update
    }
}

/// Decoded session/update notification
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdateNotification {
    pub session_id: Option<String>,
    pub update: SessionUpdate,
}

impl<'de> Deserialize<'de> for SessionUpdateNotification {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;

        let session_id = value
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        // Spec shape nests the payload under `update`; some agents flatten
        // the union at the top level.
        let payload = match value.get("update") {
            Some(update) => update.clone(),
            None => value,
        };

        let update = if payload.get("sessionUpdate").is_some() {
            serde_json::from_value::<UpdateEvent>(payload)
                .map_err(de::Error::custom)?
                .into_update()
        } else {
            serde_json::from_value::<SessionUpdate>(payload).map_err(de::Error::custom)?
        };

        Ok(Self { session_id, update })
    }
}
