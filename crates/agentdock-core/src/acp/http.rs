//! HTTP transport
//!
//! Frames go out as `POST <base>/message`; inbound traffic is pulled by
//! polling `GET <base>/messages`. The endpoint answers 204 when it has
//! nothing pending, otherwise a single frame object or an array of frames.

use super::transport::Transport;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Transport over an HTTP endpoint hosting an agent.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    state: Mutex<Option<HttpIo>>,
    frame_rx: Mutex<Option<mpsc::Receiver<Value>>>,
    // POSTs are serialized so outbound frames keep issue order.
    send_lock: Mutex<()>,
}

struct HttpIo {
    poller: tokio::task::JoinHandle<()>,
    frame_tx: mpsc::Sender<Value>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            state: Mutex::new(None),
            frame_rx: Mutex::new(None),
            send_lock: Mutex::new(()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(TransportError::AlreadyConnected.into());
        }

        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "GET {} returned {}",
                self.base_url,
                response.status()
            ))
            .into());
        }

        let (frame_tx, frame_rx) = mpsc::channel::<Value>(256);
        let poller = tokio::spawn(poll_loop(
            self.client.clone(),
            self.base_url.clone(),
            frame_tx.clone(),
        ));

        *state = Some(HttpIo { poller, frame_tx });
        *self.frame_rx.lock().await = Some(frame_rx);

        debug!(base_url = %self.base_url, "HTTP transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(io) = state.take() else {
            return Err(TransportError::NotConnected.into());
        };
        // Aborting the poller and dropping the sender ends pending recv calls.
        io.poller.abort();
        drop(io);
        drop(state);

        *self.frame_rx.lock().await = None;
        debug!(base_url = %self.base_url, "HTTP transport disconnected");
        Ok(())
    }

    async fn send(&self, frame: String) -> Result<()> {
        let frame_tx = {
            let state = self.state.lock().await;
            match state.as_ref() {
                Some(io) => io.frame_tx.clone(),
                None => return Err(TransportError::NotConnected.into()),
            }
        };

        let _send_guard = self.send_lock.lock().await;
        let response = self
            .client
            .post(format!("{}/message", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(frame)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::SendFailed(format!(
                "POST /message returned {}",
                status
            ))
            .into());
        }

        // Responses may arrive inline on the POST instead of via the poll.
        if status != StatusCode::NO_CONTENT && status != StatusCode::ACCEPTED {
            if let Ok(bytes) = response.bytes().await {
                if !bytes.is_empty() {
                    if let Ok(value) = serde_json::from_slice::<Value>(&bytes) {
                        forward_frames(&frame_tx, value).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn recv(&self) -> Option<Value> {
        let mut guard = self.frame_rx.lock().await;
        match guard.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.is_some()
    }
}

/// Pull pending agent traffic. Transient failures are tolerated by
/// continuing the loop silently.
async fn poll_loop(client: reqwest::Client, base_url: String, tx: mpsc::Sender<Value>) {
    let url = format!("{}/messages", base_url);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let response = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                trace!("poll failed: {}", e);
                continue;
            }
        };

        let status = response.status();
        if status == StatusCode::NO_CONTENT || !status.is_success() {
            continue;
        }

        let value = match response.json::<Value>().await {
            Ok(v) => v,
            Err(e) => {
                trace!("poll body was not JSON: {}", e);
                continue;
            }
        };

        if tx.is_closed() {
            break;
        }
        forward_frames(&tx, value).await;
    }
}

async fn forward_frames(tx: &mpsc::Sender<Value>, value: Value) {
    match value {
        Value::Array(frames) => {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
        }
        frame => {
            let _ = tx.send(frame).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let transport = HttpTransport::new("http://127.0.0.1:9292/");
        assert_eq!(transport.base_url(), "http://127.0.0.1:9292");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 is never listening locally.
        let transport = HttpTransport::new("http://127.0.0.1:1");
        let result = transport.connect().await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Transport(
                TransportError::ConnectionFailed(_)
            ))
        ));
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let transport = HttpTransport::new("http://127.0.0.1:1");
        let result = transport.send("{}".to_string()).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Transport(TransportError::NotConnected))
        ));
    }
}
