//! ACP session engine
//!
//! `AcpClient` drives one agent over a transport: version negotiation,
//! session lifecycle, prompt turns with streamed updates, and servicing of
//! agent-initiated requests through the delegate. All delegate calls and all
//! session-state mutation happen on the engine task, which consumes inbound
//! traffic in decoder order.

use super::codec::{
    RequestId, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, RESOURCE_NOT_FOUND,
};
use super::delegate::{AcpDelegate, DelegateError};
use super::merger::UpdateMerger;
use super::router::{Inbound, Router};
use super::session::SessionState;
use super::transport::Transport;
use crate::config::Settings;
use crate::error::{Result, SessionError, TransportError};
use crate::types::{
    AgentCapabilities, AgentInfo, AgentManifest, AgentsGetParams, AuthenticateParams,
    CancelParams, ClientCapabilities, ClientInfo, ContentBlock, FsReadTextFileParams,
    FsWriteTextFileParams, InitializeParams, InitializeResponse, LoadSessionParams,
    LoadSessionResponse, McpServerConfig, NewSessionParams, NewSessionResponse, PermissionOutcome,
    PromptParams, PromptResponse, ProtocolVersion, RequestPermissionParams,
    RequestPermissionResponse, SessionUpdateNotification, SetModeParams, SetModelParams,
    ToolsCallParams, PROTOCOL_VERSION, REJECT_ONCE_OPTION,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Initialized,
    Disconnected,
}

#[derive(Default)]
struct EngineState {
    phase: Phase,
    init: Option<InitializeResponse>,
    session: Option<SessionState>,
}

/// Host-side ACP client over a process or HTTP transport.
pub struct AcpClient {
    router: Arc<Router>,
    delegate: Arc<dyn AcpDelegate>,
    merger: Arc<UpdateMerger>,
    settings: Settings,
    state: Arc<Mutex<EngineState>>,
    engine_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AcpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        delegate: Arc<dyn AcpDelegate>,
        settings: Settings,
    ) -> Self {
        let merger = Arc::new(UpdateMerger::new(Arc::clone(&delegate), &settings));
        Self {
            router: Arc::new(Router::new(transport, settings.clone())),
            delegate,
            merger,
            settings,
            state: Arc::new(Mutex::new(EngineState::default())),
            engine_task: Mutex::new(None),
        }
    }

    /// Connect the transport and negotiate the protocol version.
    ///
    /// The returned response (agent identity, capabilities, auth methods) is
    /// cached and gates capability-dependent operations.
    pub async fn connect(&self) -> Result<InitializeResponse> {
        {
            let state = self.state.lock().await;
            if state.phase == Phase::Initialized {
                return Err(TransportError::AlreadyConnected.into());
            }
        }

        self.router.transport().connect().await?;
        let inbound = self.router.start().await;
        self.merger.reopen();
        self.spawn_engine(inbound).await;

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION,
            supported_versions: vec![ProtocolVersion {
                major: 0,
                minor: 3,
                patch: 0,
            }],
            capabilities: ClientCapabilities::standard(),
            client_info: ClientInfo::default(),
        };

        let response: InitializeResponse = match self
            .router
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let _ = self.router.disconnect().await;
                return Err(e);
            }
        };

        if let Some(agent) = &response.agent_info {
            info!(
                agent = %agent.name,
                version = %agent.version,
                protocol_version = response.protocol_version,
                "agent initialized"
            );
        } else {
            info!(
                protocol_version = response.protocol_version,
                "agent initialized (no agent info provided)"
            );
        }

        let mut state = self.state.lock().await;
        state.phase = Phase::Initialized;
        state.init = Some(response.clone());
        state.session = None;

        Ok(response)
    }

    /// Tear down the connection. Every in-flight request resolves with a
    /// disconnect error and the delegate receives no further updates.
    pub async fn disconnect(&self) -> Result<()> {
        self.router.disconnect().await?;
        let mut state = self.state.lock().await;
        state.phase = Phase::Disconnected;
        state.session = None;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.phase == Phase::Initialized
            && self.router.transport().is_connected().await
    }

    pub async fn agent_info(&self) -> Option<AgentInfo> {
        let state = self.state.lock().await;
        state.init.as_ref().and_then(|i| i.agent_info.clone())
    }

    pub async fn agent_capabilities(&self) -> Option<AgentCapabilities> {
        let state = self.state.lock().await;
        state.init.as_ref().map(|i| i.agent_capabilities.clone())
    }

    pub async fn current_session_id(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.session.as_ref().map(|s| s.id.clone())
    }

    /// Authenticate with one of the methods advertised at initialize time.
    pub async fn authenticate(&self, method_id: &str) -> Result<()> {
        self.require_initialized().await?;
        let params = AuthenticateParams {
            method_id: method_id.to_string(),
        };
        let _: Value = self
            .router
            .send_request("authenticate", Some(serde_json::to_value(&params)?))
            .await?;
        Ok(())
    }

    /// Create a session; it becomes the engine's current session.
    pub async fn new_session(
        &self,
        cwd: impl Into<String>,
        mcp_servers: Vec<McpServerConfig>,
        model: Option<String>,
        meta: Option<Value>,
    ) -> Result<NewSessionResponse> {
        self.require_initialized().await?;

        let params = NewSessionParams {
            cwd: cwd.into(),
            mcp_servers,
            model,
            meta,
        };
        let response: NewSessionResponse = self
            .router
            .request("session/new", Some(serde_json::to_value(&params)?))
            .await?;

        debug!(session_id = %response.session_id, "session created");
        let mut state = self.state.lock().await;
        state.session = Some(SessionState::from_new(&response));
        Ok(response)
    }

    /// Attach to an existing session. Requires the agent to advertise
    /// `loadSession`.
    pub async fn load_session(&self, session_id: &str) -> Result<LoadSessionResponse> {
        let capabilities = {
            let state = self.state.lock().await;
            match state.phase {
                Phase::Initialized => {}
                _ => return Err(TransportError::NotConnected.into()),
            }
            state
                .init
                .as_ref()
                .map(|i| i.agent_capabilities.clone())
                .unwrap_or_default()
        };
        if !capabilities.load_session {
            return Err(SessionError::CapabilityNotSupported("loadSession".into()).into());
        }

        let params = LoadSessionParams {
            session_id: session_id.to_string(),
            mcp_servers: Vec::new(),
        };
        let response: LoadSessionResponse = self
            .router
            .request("session/load", Some(serde_json::to_value(&params)?))
            .await?;

        debug!(
            session_id = %response.session_id,
            messages = response.messages.len(),
            "session loaded"
        );
        let mut state = self.state.lock().await;
        state.session = Some(SessionState::from_load(&response));
        Ok(response)
    }

    /// Send a plain-text prompt turn.
    pub async fn prompt_text(&self, text: impl Into<String>) -> Result<PromptResponse> {
        self.prompt(vec![ContentBlock::text(text.into())]).await
    }

    /// Send a prompt turn and suspend until the agent's terminal response.
    /// Streamed updates arrive at the delegate while this is pending.
    pub async fn prompt(&self, content: Vec<ContentBlock>) -> Result<PromptResponse> {
        let session_id = self.require_session().await?;

        if self.settings.timing {
            let mut state = self.state.lock().await;
            if let Some(session) = state.session.as_mut() {
                session.stats.begin_turn();
            }
        }

        let params = PromptParams {
            session_id,
            prompt: content,
        };
        let result: Result<PromptResponse> = self
            .router
            .request("session/prompt", Some(serde_json::to_value(&params)?))
            .await;

        if self.settings.timing {
            let mut state = self.state.lock().await;
            if let Some(session) = state.session.as_mut() {
                session
                    .stats
                    .finish_turn(result.as_ref().ok().map(|r| r.stop_reason));
            }
        }

        result
    }

    /// Ask the agent to stop the in-flight turn. Fire-and-forget: the
    /// outstanding prompt resolves when the agent sends its terminal
    /// response, expected to carry `stop_reason = cancelled`.
    pub async fn cancel(&self) -> Result<()> {
        let session_id = self.require_session().await?;
        self.router
            .send_notification(
                "session/cancel",
                Some(serde_json::to_value(&CancelParams { session_id })?),
            )
            .await
    }

    pub async fn set_session_mode(&self, mode_id: &str) -> Result<()> {
        let session_id = self.require_session().await?;
        let params = SetModeParams {
            session_id,
            mode_id: mode_id.to_string(),
        };
        let _: Value = self
            .router
            .send_request("session/set_mode", Some(serde_json::to_value(&params)?))
            .await?;

        let mut state = self.state.lock().await;
        if let Some(session) = state.session.as_mut() {
            session.set_current_mode(mode_id);
        }
        Ok(())
    }

    pub async fn set_session_model(&self, model_id: &str) -> Result<()> {
        let session_id = self.require_session().await?;
        let params = SetModelParams {
            session_id,
            model_id: model_id.to_string(),
        };
        let _: Value = self
            .router
            .send_request("session/set_model", Some(serde_json::to_value(&params)?))
            .await?;

        let mut state = self.state.lock().await;
        if let Some(session) = state.session.as_mut() {
            session.set_current_model(model_id);
        }
        Ok(())
    }

    /// Fetch the agent manifest via agents/get. Falls back to the name the
    /// agent reported at initialize time.
    pub async fn get_agent_manifest(&self, name: Option<&str>) -> Result<AgentManifest> {
        self.require_initialized().await?;

        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let state = self.state.lock().await;
                state
                    .init
                    .as_ref()
                    .and_then(|i| i.agent_info.as_ref())
                    .map(|a| a.name.clone())
                    .ok_or(SessionError::NoAgentName)?
            }
        };

        self.router
            .request(
                "agents/get",
                Some(serde_json::to_value(&AgentsGetParams { name })?),
            )
            .await
    }

    async fn require_initialized(&self) -> Result<()> {
        let state = self.state.lock().await;
        match state.phase {
            Phase::Initialized => Ok(()),
            _ => Err(TransportError::NotConnected.into()),
        }
    }

    async fn require_session(&self) -> Result<String> {
        let state = self.state.lock().await;
        match state.phase {
            Phase::Initialized => {}
            _ => return Err(TransportError::NotConnected.into()),
        }
        state
            .session
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or_else(|| SessionError::NoActiveSession.into())
    }

    async fn spawn_engine(&self, inbound: mpsc::Receiver<Inbound>) {
        let task = tokio::spawn(engine_loop(
            inbound,
            Arc::clone(&self.router),
            Arc::clone(&self.delegate),
            Arc::clone(&self.merger),
            Arc::clone(&self.state),
            self.settings.clone(),
        ));
        let mut engine_task = self.engine_task.lock().await;
        if let Some(old) = engine_task.replace(task) {
            old.abort();
        }
    }
}

/// Engine task: consumes classified inbound traffic in decoder order.
async fn engine_loop(
    mut inbound: mpsc::Receiver<Inbound>,
    router: Arc<Router>,
    delegate: Arc<dyn AcpDelegate>,
    merger: Arc<UpdateMerger>,
    state: Arc<Mutex<EngineState>>,
    settings: Settings,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            Inbound::Request { id, method, params } => {
                handle_agent_request(&router, &delegate, id, &method, params).await;
            }
            Inbound::Notification { method, params } => match method.as_str() {
                "session/update" => {
                    handle_session_update(&merger, &state, &settings, params).await;
                }
                other => {
                    debug!(method = %other, "ignoring unknown notification");
                }
            },
            Inbound::OrphanError(err) => {
                warn!(code = err.code, message = %err.message, "agent reported an error");
            }
            Inbound::Disconnected => {
                let mut state = state.lock().await;
                state.phase = Phase::Disconnected;
                state.session = None;
                drop(state);
                merger.shutdown().await;
                // Reap transport state so a fresh connect can follow.
                let _ = router.disconnect().await;
                break;
            }
        }
    }
    debug!("engine task finished");
}

async fn handle_session_update(
    merger: &Arc<UpdateMerger>,
    state: &Arc<Mutex<EngineState>>,
    settings: &Settings,
    params: Value,
) {
    let notification: SessionUpdateNotification = match serde_json::from_value(params) {
        Ok(n) => n,
        Err(e) => {
            warn!("dropping undecodable session/update: {}", e);
            return;
        }
    };

    let session_id = {
        let mut state = state.lock().await;
        let session_id = notification
            .session_id
            .clone()
            .or_else(|| state.session.as_ref().map(|s| s.id.clone()));

        if let Some(session) = state.session.as_mut() {
            if session_id.as_deref() == Some(session.id.as_str()) {
                session.absorb_update(&notification.update);
                if settings.timing {
                    session.stats.record_update(&notification.update);
                }
            }
        }
        session_id
    };

    match session_id {
        Some(session_id) => merger.ingest(session_id, notification.update).await,
        None => warn!("session/update without a session id, dropping"),
    }
}

/// Service one agent-initiated request through the delegate and write the
/// response. Delegate failures become JSON-RPC error responses; they are not
/// surfaced to the application, which already observes them through the
/// agent's behavior.
async fn handle_agent_request(
    router: &Arc<Router>,
    delegate: &Arc<dyn AcpDelegate>,
    id: RequestId,
    method: &str,
    params: Value,
) {
    let outcome = match method {
        "session/request_permission" => {
            match serde_json::from_value::<RequestPermissionParams>(params) {
                Ok(request) => {
                    let option_id = match delegate.choose_permission(request).await {
                        Ok(option_id) => option_id,
                        Err(e) => {
                            debug!("permission chooser unavailable ({}), rejecting", e);
                            REJECT_ONCE_OPTION.to_string()
                        }
                    };
                    let response = RequestPermissionResponse {
                        outcome: PermissionOutcome::Selected { option_id },
                    };
                    respond(router, id, serde_json::to_value(&response)).await
                }
                Err(e) => router.send_error(id, INVALID_PARAMS, &e.to_string()).await,
            }
        }
        "fs/read_text_file" => match serde_json::from_value::<FsReadTextFileParams>(params) {
            Ok(p) => match delegate.read_file(&p.path).await {
                Ok(content) => respond(router, id, Ok(json!({ "content": content }))).await,
                Err(e) => {
                    router
                        .send_error(id, RESOURCE_NOT_FOUND, &e.to_string())
                        .await
                }
            },
            Err(e) => router.send_error(id, INVALID_PARAMS, &e.to_string()).await,
        },
        "fs/write_text_file" => match serde_json::from_value::<FsWriteTextFileParams>(params) {
            Ok(p) => match delegate.write_file(&p.path, &p.content).await {
                Ok(()) => respond(router, id, Ok(json!({ "success": true }))).await,
                Err(e) => router.send_error(id, INTERNAL_ERROR, &e.to_string()).await,
            },
            Err(e) => router.send_error(id, INVALID_PARAMS, &e.to_string()).await,
        },
        "tools/list" => match delegate.list_tools().await {
            Ok(tools) => respond(router, id, Ok(json!({ "tools": tools }))).await,
            Err(DelegateError::NotImplemented(_)) => {
                respond(router, id, Ok(json!({ "tools": [] }))).await
            }
            Err(e) => router.send_error(id, INTERNAL_ERROR, &e.to_string()).await,
        },
        "tools/call" => match serde_json::from_value::<ToolsCallParams>(params) {
            Ok(p) => match delegate.call_tool(&p.name, p.arguments).await {
                Ok(response) => respond(router, id, serde_json::to_value(&response)).await,
                Err(DelegateError::NotImplemented(_)) => {
                    router
                        .send_error(id, METHOD_NOT_FOUND, "Method not found: tools/call")
                        .await
                }
                Err(e) => router.send_error(id, INTERNAL_ERROR, &e.to_string()).await,
            },
            Err(e) => router.send_error(id, INVALID_PARAMS, &e.to_string()).await,
        },
        other => {
            router
                .send_error(
                    id,
                    METHOD_NOT_FOUND,
                    &format!("Method not found: {}", other),
                )
                .await
        }
    };

    if let Err(e) = outcome {
        error!(method = %method, "failed to send response to agent: {}", e);
    }
}

async fn respond(
    router: &Arc<Router>,
    id: RequestId,
    result: serde_json::Result<Value>,
) -> Result<()> {
    match result {
        Ok(value) => router.send_response(id, value).await,
        Err(e) => router.send_error(id, INTERNAL_ERROR, &e.to_string()).await,
    }
}
