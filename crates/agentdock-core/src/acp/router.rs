//! Request/response correlation over a transport
//!
//! Outgoing requests park their caller on a oneshot future keyed by request
//! id; the reader task matches inbound responses and errors back to those
//! futures and forwards agent-initiated traffic to the session engine on a
//! single ordered channel.

use super::codec::{self, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use super::transport::Transport;
use crate::config::Settings;
use crate::error::{Error, ProtocolError, Result, TransportError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// Agent-initiated traffic, in the exact order the decoder produced it.
#[derive(Debug)]
pub enum Inbound {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    /// Error frame with a null id; resolves no future but is surfaced for
    /// visibility.
    OrphanError(JsonRpcError),
    /// The transport reached end-of-stream; all pending futures have been
    /// failed.
    Disconnected,
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value>>>>>;
type SpanMap = Arc<Mutex<HashMap<RequestId, RequestSpan>>>;

struct RequestSpan {
    method: String,
    started: Instant,
    request_bytes: usize,
}

pub struct Router {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: PendingMap,
    spans: SpanMap,
    settings: Settings,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Set once the reader observes end-of-stream; requests issued after
    /// that point fail immediately instead of parking forever.
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl Router {
    pub fn new(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            spans: Arc::new(Mutex::new(HashMap::new())),
            settings,
            reader: Mutex::new(None),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Start the reader for a fresh connection and hand back the inbound
    /// channel. Resets the id counter, so ids start at 1 per connection.
    pub async fn start(&self) -> mpsc::Receiver<Inbound> {
        self.next_id.store(1, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);

        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let task = tokio::spawn(read_loop(
            Arc::clone(&self.transport),
            Arc::clone(&self.pending),
            Arc::clone(&self.spans),
            inbound_tx,
            self.settings.clone(),
            Arc::clone(&self.closed),
        ));

        let mut reader = self.reader.lock().await;
        if let Some(old) = reader.replace(task) {
            old.abort();
        }

        inbound_rx
    }

    /// Tear the connection down. The reader observes end-of-stream and fails
    /// every parked caller with a disconnect error.
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await
    }

    /// Issue a request and decode the matched response into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let result = self.send_request(method, params).await?;
        serde_json::from_value(result).map_err(Error::from)
    }

    /// Issue a request and suspend until its response or error arrives, the
    /// caller is dropped, or the transport disconnects. No built-in timeout.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected.into());
        }
        if !self.transport.is_connected().await {
            return Err(TransportError::NotConnected.into());
        }

        let id: RequestId = self.next_id.fetch_add(1, Ordering::SeqCst).into();
        let frame = JsonRpcRequest::new(id.clone(), method, params);
        let encoded = codec::encode_frame(&frame)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        if self.settings.timing {
            self.spans.lock().await.insert(
                id.clone(),
                RequestSpan {
                    method: method.to_string(),
                    started: Instant::now(),
                    request_bytes: encoded.len(),
                },
            );
        }

        if self.settings.verbose {
            debug!(frame = %encoded, "-> agent");
        }

        if let Err(e) = self.transport.send(encoded).await {
            self.pending.lock().await.remove(&id);
            self.spans.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(result) => result,
            // Sender dropped without a verdict: the connection went away.
            Err(_) => Err(TransportError::Disconnected.into()),
        }
    }

    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = JsonRpcRequest::notification(method, params);
        let encoded = codec::encode_frame(&frame)?;
        if self.settings.verbose {
            debug!(frame = %encoded, "-> agent");
        }
        self.transport.send(encoded).await
    }

    pub async fn send_response(&self, id: RequestId, result: Value) -> Result<()> {
        let frame = JsonRpcResponse::success(id, result);
        let encoded = codec::encode_frame(&frame)?;
        if self.settings.verbose {
            debug!(frame = %encoded, "-> agent");
        }
        self.transport.send(encoded).await
    }

    pub async fn send_error(&self, id: RequestId, code: i32, message: &str) -> Result<()> {
        let frame = JsonRpcResponse::error(id, code, message);
        let encoded = codec::encode_frame(&frame)?;
        if self.settings.verbose {
            debug!(frame = %encoded, "-> agent");
        }
        self.transport.send(encoded).await
    }
}

async fn read_loop(
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    spans: SpanMap,
    inbound_tx: mpsc::Sender<Inbound>,
    settings: Settings,
    closed: Arc<std::sync::atomic::AtomicBool>,
) {
    loop {
        let Some(value) = transport.recv().await else {
            break;
        };

        if settings.verbose {
            debug!(frame = %value, "<- agent");
        }

        match codec::classify(&value) {
            Ok(IncomingMessage::Response { id, result }) => {
                finish_span(&spans, &id, &settings, Some(&result), None).await;
                deliver(&pending, &id, Ok(result)).await;
            }
            Ok(IncomingMessage::Error { id: Some(id), error }) => {
                finish_span(&spans, &id, &settings, None, Some(&error)).await;
                deliver(
                    &pending,
                    &id,
                    Err(ProtocolError::Rpc {
                        code: error.code,
                        message: error.message,
                        data: error.data,
                    }
                    .into()),
                )
                .await;
            }
            Ok(IncomingMessage::Error { id: None, error }) => {
                warn!(
                    code = error.code,
                    message = %error.message,
                    "agent error frame without id"
                );
                let _ = inbound_tx.send(Inbound::OrphanError(error)).await;
            }
            Ok(IncomingMessage::Request { id, method, params }) => {
                if inbound_tx
                    .send(Inbound::Request { id, method, params })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(IncomingMessage::Notification { method, params }) => {
                if inbound_tx
                    .send(Inbound::Notification { method, params })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                // The offending frame is dropped; reading continues.
                error!("failed to classify frame: {}", e);
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let mut parked = pending.lock().await;
    for (id, tx) in parked.drain() {
        debug!(id = %id, "failing pending request on disconnect");
        let _ = tx.send(Err(TransportError::Disconnected.into()));
    }
    drop(parked);
    spans.lock().await.clear();

    let _ = inbound_tx.send(Inbound::Disconnected).await;
    debug!("router reader finished");
}

/// A late response after local cancellation is normal: the id is unknown by
/// then and the frame is discarded without affecting other traffic.
async fn deliver(pending: &PendingMap, id: &RequestId, result: Result<Value>) {
    match pending.lock().await.remove(id) {
        Some(tx) => {
            if tx.send(result).is_err() {
                debug!(id = %id, "caller cancelled before response arrived");
            }
        }
        None => {
            warn!(id = %id, "response for unknown request id, discarding");
        }
    }
}

async fn finish_span(
    spans: &SpanMap,
    id: &RequestId,
    settings: &Settings,
    result: Option<&Value>,
    error: Option<&JsonRpcError>,
) {
    if !settings.timing {
        return;
    }
    if let Some(span) = spans.lock().await.remove(id) {
        let response_bytes = result.map(|v| v.to_string().len()).unwrap_or(0);
        info!(
            method = %span.method,
            id = %id,
            elapsed_ms = span.started.elapsed().as_millis() as u64,
            request_bytes = span.request_bytes,
            response_bytes,
            error_code = error.map(|e| e.code),
            "request completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// In-memory transport: outbound frames are captured on a channel, and
    /// the test feeds inbound frames through a paired sender.
    struct ChannelTransport {
        outbound: mpsc::UnboundedSender<Value>,
        inbound: Mutex<mpsc::Receiver<Value>>,
    }

    fn channel_transport() -> (
        Arc<ChannelTransport>,
        mpsc::UnboundedReceiver<Value>,
        mpsc::Sender<Value>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(64);
        (
            Arc::new(ChannelTransport {
                outbound: out_tx,
                inbound: Mutex::new(in_rx),
            }),
            out_rx,
            in_tx,
        )
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, frame: String) -> Result<()> {
            let value: Value = serde_json::from_str(&frame).unwrap();
            self.outbound
                .send(value)
                .map_err(|_| TransportError::SendFailed("closed".into()).into())
        }

        async fn recv(&self) -> Option<Value> {
            self.inbound.lock().await.recv().await
        }

        async fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_ids_are_increasing_integer_strings_from_one() {
        let (transport, mut out_rx, in_tx) = channel_transport();
        let router = Arc::new(Router::new(transport, Settings::default()));
        let _inbound = router.start().await;

        let r1 = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.send_request("session/new", None).await })
        };
        let first = out_rx.recv().await.unwrap();
        assert_eq!(first["id"], "1");

        in_tx
            .send(json!({ "jsonrpc": "2.0", "id": "1", "result": {} }))
            .await
            .unwrap();
        r1.await.unwrap().unwrap();

        let r2 = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.send_request("session/prompt", None).await })
        };
        let second = out_rx.recv().await.unwrap();
        assert_eq!(second["id"], "2");

        in_tx
            .send(json!({ "jsonrpc": "2.0", "id": "2", "result": {} }))
            .await
            .unwrap();
        r2.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_discarded() {
        let (transport, mut out_rx, in_tx) = channel_transport();
        let router = Arc::new(Router::new(transport, Settings::default()));
        let _inbound = router.start().await;

        let pending = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.send_request("initialize", None).await })
        };
        let _ = out_rx.recv().await.unwrap();

        // A stray response must not disturb the parked caller.
        in_tx
            .send(json!({ "jsonrpc": "2.0", "id": "99", "result": {} }))
            .await
            .unwrap();
        in_tx
            .send(json!({ "jsonrpc": "2.0", "id": "1", "result": { "ok": true } }))
            .await
            .unwrap();

        let result = pending.await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn test_error_frame_resolves_caller_with_protocol_error() {
        let (transport, mut out_rx, in_tx) = channel_transport();
        let router = Arc::new(Router::new(transport, Settings::default()));
        let _inbound = router.start().await;

        let pending = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.send_request("session/load", None).await })
        };
        let _ = out_rx.recv().await.unwrap();

        in_tx
            .send(json!({
                "jsonrpc": "2.0",
                "id": "1",
                "error": { "code": -32601, "message": "Method not found" }
            }))
            .await
            .unwrap();

        match pending.await.unwrap() {
            Err(Error::Protocol(ProtocolError::Rpc { code, .. })) => assert_eq!(code, -32601),
            other => panic!("expected rpc error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_fails_pending_and_emits_disconnected() {
        let (transport, mut out_rx, in_tx) = channel_transport();
        let router = Arc::new(Router::new(transport, Settings::default()));
        let mut inbound = router.start().await;

        let pending = {
            let router = Arc::clone(&router);
            tokio::spawn(async move { router.send_request("session/prompt", None).await })
        };
        let _ = out_rx.recv().await.unwrap();

        drop(in_tx);

        match pending.await.unwrap() {
            Err(Error::Transport(TransportError::Disconnected)) => {}
            other => panic!("expected disconnect, got {:?}", other),
        }
        assert!(matches!(inbound.recv().await, Some(Inbound::Disconnected)));
    }

    #[tokio::test]
    async fn test_notification_has_no_id() {
        let (transport, mut out_rx, _in_tx) = channel_transport();
        let router = Router::new(transport, Settings::default());

        router
            .send_notification("session/cancel", Some(json!({ "sessionId": "s1" })))
            .await
            .unwrap();

        let frame = out_rx.recv().await.unwrap();
        assert_eq!(frame["method"], "session/cancel");
        assert!(frame.get("id").is_none());
    }

    #[tokio::test]
    async fn test_inbound_order_is_preserved() {
        let (transport, _out_rx, in_tx) = channel_transport();
        let router = Router::new(transport, Settings::default());
        let mut inbound = router.start().await;

        in_tx
            .send(json!({ "jsonrpc": "2.0", "method": "session/update", "params": { "n": 1 } }))
            .await
            .unwrap();
        in_tx
            .send(json!({ "jsonrpc": "2.0", "id": 9, "method": "fs/read_text_file", "params": {} }))
            .await
            .unwrap();
        in_tx
            .send(json!({ "jsonrpc": "2.0", "method": "session/update", "params": { "n": 2 } }))
            .await
            .unwrap();

        match inbound.recv().await.unwrap() {
            Inbound::Notification { params, .. } => assert_eq!(params["n"], 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(inbound.recv().await.unwrap(), Inbound::Request { .. }));
        match inbound.recv().await.unwrap() {
            Inbound::Notification { params, .. } => assert_eq!(params["n"], 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
