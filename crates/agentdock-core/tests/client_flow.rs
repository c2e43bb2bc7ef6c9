//! End-to-end client flows against a scripted in-memory agent.

use agentdock_core::{
    AcpClient, AcpDelegate, DelegateError, DelegateResult, Result, Settings, SessionError,
    SessionUpdate, StopReason, Transport, TransportError,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// In-memory transport pair: the test plays the agent on the other end.
struct PairTransport {
    to_agent: mpsc::UnboundedSender<Value>,
    from_agent: Mutex<mpsc::Receiver<Value>>,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for PairTransport {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected.into());
        }
        let value: Value = serde_json::from_str(&frame).expect("client frames are valid JSON");
        self.to_agent
            .send(value)
            .map_err(|_| TransportError::SendFailed("agent went away".into()).into())
    }

    async fn recv(&self) -> Option<Value> {
        self.from_agent.lock().await.recv().await
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct TestDelegate {
    updates: mpsc::UnboundedSender<SessionUpdate>,
    permission_choice: Option<String>,
    files: HashMap<String, String>,
}

#[async_trait]
impl AcpDelegate for TestDelegate {
    async fn on_update(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }

    async fn choose_permission(
        &self,
        _request: agentdock_core::RequestPermissionParams,
    ) -> DelegateResult<String> {
        match &self.permission_choice {
            Some(choice) => Ok(choice.clone()),
            None => Err(DelegateError::NotImplemented("choose_permission")),
        }
    }

    async fn read_file(&self, path: &str) -> DelegateResult<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| DelegateError::failed(format!("no such file: {}", path)))
    }
}

struct Harness {
    client: Arc<AcpClient>,
    agent_rx: mpsc::UnboundedReceiver<Value>,
    agent_tx: mpsc::Sender<Value>,
    updates_rx: mpsc::UnboundedReceiver<SessionUpdate>,
}

fn harness(permission_choice: Option<&str>) -> Harness {
    let (to_agent_tx, agent_rx) = mpsc::unbounded_channel();
    let (agent_tx, from_agent_rx) = mpsc::channel(64);
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();

    let transport = Arc::new(PairTransport {
        to_agent: to_agent_tx,
        from_agent: Mutex::new(from_agent_rx),
        connected: AtomicBool::new(false),
    });
    let delegate = Arc::new(TestDelegate {
        updates: updates_tx,
        permission_choice: permission_choice.map(str::to_string),
        files: HashMap::from([("/tmp/hello.txt".to_string(), "hi there".to_string())]),
    });

    Harness {
        client: Arc::new(AcpClient::new(transport, delegate, Settings::default())),
        agent_rx,
        agent_tx,
        updates_rx,
    }
}

fn init_result(load_session: bool) -> Value {
    json!({
        "protocolVersion": 1,
        "agentCapabilities": {
            "loadSession": load_session,
            "promptCapabilities": { "image": true }
        },
        "agentInfo": { "name": "A", "version": "9" }
    })
}

fn chunk_notification(session_id: &str, text: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": {
            "sessionId": session_id,
            "update": {
                "sessionUpdate": "agent_message_chunk",
                "content": { "type": "text", "text": text }
            }
        }
    })
}

fn reply(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Run the initialize handshake and leave the client connected.
async fn connect(h: &mut Harness, result: Value) {
    let client = Arc::clone(&h.client);
    let task = tokio::spawn(async move { client.connect().await });

    let frame = h.agent_rx.recv().await.expect("initialize frame");
    assert_eq!(frame["method"], "initialize");
    h.agent_tx
        .send(reply(frame["id"].clone(), result))
        .await
        .unwrap();

    task.await.unwrap().expect("connect succeeds");
}

/// Create a session `s1` and make it current.
async fn open_session(h: &mut Harness) {
    let client = Arc::clone(&h.client);
    let task = tokio::spawn(async move { client.new_session("/tmp", Vec::new(), None, None).await });

    let frame = h.agent_rx.recv().await.expect("session/new frame");
    assert_eq!(frame["method"], "session/new");
    h.agent_tx
        .send(reply(frame["id"].clone(), json!({ "sessionId": "s1" })))
        .await
        .unwrap();

    let response = task.await.unwrap().unwrap();
    assert_eq!(response.session_id, "s1");
}

#[tokio::test]
async fn initialize_round_trip() {
    let mut h = harness(None);

    let client = Arc::clone(&h.client);
    let task = tokio::spawn(async move { client.connect().await });

    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["jsonrpc"], "2.0");
    assert_eq!(frame["id"], "1");
    assert_eq!(frame["method"], "initialize");
    assert_eq!(frame["params"]["protocolVersion"], 1);
    assert_eq!(frame["params"]["supportedVersions"][0]["minor"], 3);
    assert_eq!(frame["params"]["capabilities"]["fs"]["readTextFile"], true);
    assert_eq!(frame["params"]["capabilities"]["fs"]["writeTextFile"], true);

    h.agent_tx
        .send(reply(frame["id"].clone(), init_result(true)))
        .await
        .unwrap();

    let response = task.await.unwrap().unwrap();
    assert_eq!(response.agent_info.as_ref().unwrap().name, "A");
    assert!(response.agent_capabilities.load_session);
    assert!(response.agent_capabilities.prompt_capabilities.image);
    assert!(h.client.is_connected().await);
}

#[tokio::test]
async fn prompt_streams_then_cancel() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;
    open_session(&mut h).await;

    let client = Arc::clone(&h.client);
    let prompt = tokio::spawn(async move { client.prompt_text("hi").await });

    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["method"], "session/prompt");
    assert_eq!(frame["params"]["sessionId"], "s1");
    assert_eq!(frame["params"]["prompt"][0]["text"], "hi");

    for text in ["one", "two", "three"] {
        h.agent_tx
            .send(chunk_notification("s1", text))
            .await
            .unwrap();
    }

    h.client.cancel().await.unwrap();
    let cancel = h.agent_rx.recv().await.unwrap();
    assert_eq!(cancel["method"], "session/cancel");
    assert!(cancel.get("id").is_none());
    assert_eq!(cancel["params"]["sessionId"], "s1");

    h.agent_tx
        .send(reply(
            frame["id"].clone(),
            json!({ "stopReason": "cancelled" }),
        ))
        .await
        .unwrap();

    let response = prompt.await.unwrap().unwrap();
    assert_eq!(response.stop_reason, StopReason::Cancelled);

    let update = h.updates_rx.recv().await.unwrap();
    let texts: Vec<_> = update
        .message_chunks
        .iter()
        .filter_map(|c| c.as_text())
        .collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn permission_round_trip() {
    let mut h = harness(Some("allow_once"));
    connect(&mut h, init_result(false)).await;

    h.agent_tx
        .send(json!({
            "jsonrpc": "2.0",
            "id": "42",
            "method": "session/request_permission",
            "params": {
                "options": [
                    { "optionId": "allow_once", "name": "Allow", "kind": "allow_once" },
                    { "optionId": "reject_once", "name": "Deny", "kind": "reject_once" }
                ]
            }
        }))
        .await
        .unwrap();

    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["id"], "42");
    assert_eq!(frame["result"]["outcome"]["outcome"], "selected");
    assert_eq!(frame["result"]["outcome"]["optionId"], "allow_once");
}

#[tokio::test]
async fn permission_rejected_without_chooser() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;

    h.agent_tx
        .send(json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "session/request_permission",
            "params": {
                "options": [{ "optionId": "allow_once", "name": "Allow" }]
            }
        }))
        .await
        .unwrap();

    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["id"], 8);
    assert_eq!(frame["result"]["outcome"]["optionId"], "reject_once");
}

#[tokio::test]
async fn update_batching_single_delivery() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;
    open_session(&mut h).await;

    for text in ["a", "b", "c", "d", "e"] {
        h.agent_tx
            .send(chunk_notification("s1", text))
            .await
            .unwrap();
    }

    let update = h.updates_rx.recv().await.unwrap();
    let texts: Vec<_> = update
        .message_chunks
        .iter()
        .filter_map(|c| c.as_text())
        .collect();
    assert_eq!(texts, vec!["a", "b", "c", "d", "e"]);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(h.updates_rx.try_recv().is_err(), "only one delivery expected");
}

#[tokio::test]
async fn unknown_inbound_method_gets_method_not_found() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;

    h.agent_tx
        .send(json!({
            "jsonrpc": "2.0",
            "id": "7",
            "method": "bogus/method",
            "params": {}
        }))
        .await
        .unwrap();

    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["id"], "7");
    assert_eq!(frame["error"]["code"], -32601);
    assert_eq!(frame["error"]["message"], "Method not found: bogus/method");
}

#[tokio::test]
async fn disconnect_fails_inflight_prompt_and_subsequent_calls() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;
    open_session(&mut h).await;

    let client = Arc::clone(&h.client);
    let prompt = tokio::spawn(async move { client.prompt_text("hi").await });
    let _ = h.agent_rx.recv().await.unwrap();

    // Agent goes away: end of stream on the transport.
    drop(h.agent_tx);

    match prompt.await.unwrap() {
        Err(agentdock_core::Error::Transport(TransportError::Disconnected)) => {}
        other => panic!("expected disconnect error, got {:?}", other),
    }

    // Wait for the engine to observe the disconnect.
    for _ in 0..100 {
        if !h.client.is_connected().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!h.client.is_connected().await);

    match h.client.prompt_text("again").await {
        Err(agentdock_core::Error::Transport(TransportError::NotConnected)) => {}
        other => panic!("expected not-connected, got {:?}", other),
    }
}

#[tokio::test]
async fn fs_read_round_trip_and_missing_file() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;

    h.agent_tx
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "fs/read_text_file",
            "params": { "path": "/tmp/hello.txt" }
        }))
        .await
        .unwrap();
    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["result"]["content"], "hi there");

    h.agent_tx
        .send(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "fs/read_text_file",
            "params": { "path": "/tmp/missing.txt" }
        }))
        .await
        .unwrap();
    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["error"]["code"], -32002);

    // Writes are refused by this delegate and map to an internal error.
    h.agent_tx
        .send(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "fs/write_text_file",
            "params": { "path": "/tmp/out.txt", "content": "x" }
        }))
        .await
        .unwrap();
    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["error"]["code"], -32603);
}

#[tokio::test]
async fn tools_list_defaults_to_empty() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;

    h.agent_tx
        .send(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/list",
            "params": {}
        }))
        .await
        .unwrap();
    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["result"]["tools"], json!([]));

    h.agent_tx
        .send(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": { "name": "grep", "arguments": {} }
        }))
        .await
        .unwrap();
    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["error"]["code"], -32601);
}

#[tokio::test]
async fn load_session_requires_capability() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;

    match h.client.load_session("old").await {
        Err(agentdock_core::Error::Session(SessionError::CapabilityNotSupported(cap))) => {
            assert_eq!(cap, "loadSession");
        }
        other => panic!("expected capability error, got {:?}", other),
    }

    // Nothing was written to the agent.
    assert!(h.agent_rx.try_recv().is_err());
}

#[tokio::test]
async fn load_session_round_trip() {
    let mut h = harness(None);
    connect(&mut h, init_result(true)).await;

    let client = Arc::clone(&h.client);
    let task = tokio::spawn(async move { client.load_session("old").await });

    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["method"], "session/load");
    assert_eq!(frame["params"]["sessionId"], "old");

    h.agent_tx
        .send(reply(
            frame["id"].clone(),
            json!({
                "sessionId": "old",
                "modes": {
                    "availableModes": [{ "id": "code", "name": "Code" }],
                    "currentModeId": "code"
                },
                "messages": [
                    { "role": "user", "content": [{ "type": "text", "text": "earlier" }] }
                ]
            }),
        ))
        .await
        .unwrap();

    let response = task.await.unwrap().unwrap();
    assert_eq!(response.session_id, "old");
    assert_eq!(
        response.modes.unwrap().current_mode_id.as_deref(),
        Some("code")
    );
    assert_eq!(response.messages.len(), 1);
    assert_eq!(h.client.current_session_id().await.as_deref(), Some("old"));
}

#[tokio::test]
async fn prompt_without_session_fails() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;

    match h.client.prompt_text("hi").await {
        Err(agentdock_core::Error::Session(SessionError::NoActiveSession)) => {}
        other => panic!("expected no-active-session, got {:?}", other),
    }
}

#[tokio::test]
async fn set_mode_updates_cached_state() {
    let mut h = harness(None);
    connect(&mut h, init_result(false)).await;
    open_session(&mut h).await;

    let client = Arc::clone(&h.client);
    let task = tokio::spawn(async move { client.set_session_mode("architect").await });

    let frame = h.agent_rx.recv().await.unwrap();
    assert_eq!(frame["method"], "session/set_mode");
    assert_eq!(frame["params"]["modeId"], "architect");
    h.agent_tx
        .send(reply(frame["id"].clone(), Value::Null))
        .await
        .unwrap();

    task.await.unwrap().unwrap();
}
