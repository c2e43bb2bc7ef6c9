//! Streaming update merger
//!
//! High-frequency session/update bursts are coalesced into one buffer per
//! session and delivered to the delegate when the batch window fires.
//! Message chunks and tool calls append in arrival order; plan, commands and
//! modes keep the latest value. Nothing accepted into a buffer is dropped:
//! every chunk appears in exactly one delivery.

use super::delegate::AcpDelegate;
use crate::config::Settings;
use crate::types::SessionUpdate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::trace;

#[derive(Default)]
struct MergeBuffer {
    update: SessionUpdate,
    flush_scheduled: bool,
}

pub struct UpdateMerger {
    delegate: Arc<dyn AcpDelegate>,
    batching: bool,
    window: Duration,
    buffers: Arc<Mutex<HashMap<String, MergeBuffer>>>,
    closed: Arc<AtomicBool>,
}

impl UpdateMerger {
    pub fn new(delegate: Arc<dyn AcpDelegate>, settings: &Settings) -> Self {
        Self {
            delegate,
            batching: settings.batching,
            window: settings.batch_window,
            buffers: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Accept one decoded update for a session.
    pub async fn ingest(&self, session_id: String, update: SessionUpdate) {
        if update.is_empty() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        if !self.batching {
            self.delegate.on_update(update).await;
            return;
        }

        let schedule = {
            let mut buffers = self.buffers.lock().await;
            let buffer = buffers.entry(session_id.clone()).or_default();
            buffer.update.merge(update);
            if buffer.flush_scheduled {
                false
            } else {
                buffer.flush_scheduled = true;
                true
            }
        };

        if schedule {
            trace!(session_id = %session_id, "arming batch flush");
            tokio::spawn(flush_loop(
                Arc::clone(&self.delegate),
                Arc::clone(&self.buffers),
                Arc::clone(&self.closed),
                self.window,
                session_id,
            ));
        }
    }

    /// Re-arm after a fresh connect.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Stop all deliveries and drop every buffer. Used on disconnect, after
    /// which the delegate must see no further updates.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.buffers.lock().await.clear();
    }
}

/// One armed flush per session at a time. If updates land while a delivery
/// is in progress they stay buffered and the loop runs another window, so
/// ordering across flushes follows scheduling order.
async fn flush_loop(
    delegate: Arc<dyn AcpDelegate>,
    buffers: Arc<Mutex<HashMap<String, MergeBuffer>>>,
    closed: Arc<AtomicBool>,
    window: Duration,
    session_id: String,
) {
    loop {
        tokio::time::sleep(window).await;

        let taken = {
            let mut buffers = buffers.lock().await;
            match buffers.get_mut(&session_id) {
                Some(buffer) => std::mem::take(&mut buffer.update),
                None => return,
            }
        };

        if closed.load(Ordering::SeqCst) {
            return;
        }
        if !taken.is_empty() {
            delegate.on_update(taken).await;
        }

        let mut buffers = buffers.lock().await;
        match buffers.get_mut(&session_id) {
            Some(buffer) if buffer.update.is_empty() => {
                buffer.flush_scheduled = false;
                return;
            }
            Some(_) => {
                // More arrived during delivery; keep the flush armed.
            }
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentBlock;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct CapturingDelegate {
        tx: mpsc::UnboundedSender<SessionUpdate>,
    }

    #[async_trait]
    impl AcpDelegate for CapturingDelegate {
        async fn on_update(&self, update: SessionUpdate) {
            let _ = self.tx.send(update);
        }
    }

    fn merger(batching: bool, window_ms: u64) -> (UpdateMerger, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = Settings {
            batching,
            batch_window: Duration::from_millis(window_ms),
            ..Settings::default()
        };
        (UpdateMerger::new(Arc::new(CapturingDelegate { tx }), &settings), rx)
    }

    fn chunk(text: &str) -> SessionUpdate {
        SessionUpdate {
            message_chunks: vec![ContentBlock::text(text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_delivery() {
        let (merger, mut rx) = merger(true, 20);

        for text in ["a", "b", "c", "d", "e"] {
            merger.ingest("s1".into(), chunk(text)).await;
        }

        let update = rx.recv().await.unwrap();
        let texts: Vec<_> = update
            .message_chunks
            .iter()
            .filter_map(|c| c.as_text())
            .collect();
        assert_eq!(texts, vec!["a", "b", "c", "d", "e"]);

        // Nothing else was delivered.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_order_preserved_across_windows() {
        let (merger, mut rx) = merger(true, 10);

        merger.ingest("s1".into(), chunk("first")).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first.message_chunks[0].as_text(), Some("first"));

        merger.ingest("s1".into(), chunk("second")).await;
        let second = rx.recv().await.unwrap();
        assert_eq!(second.message_chunks[0].as_text(), Some("second"));
    }

    #[tokio::test]
    async fn test_verbatim_when_batching_disabled() {
        let (merger, mut rx) = merger(false, 10);

        merger.ingest("s1".into(), chunk("a")).await;
        merger.ingest("s1".into(), chunk("b")).await;

        assert_eq!(rx.recv().await.unwrap().message_chunks.len(), 1);
        assert_eq!(rx.recv().await.unwrap().message_chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_updates_are_not_delivered() {
        let (merger, mut rx) = merger(true, 10);
        merger.ingest("s1".into(), SessionUpdate::default()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_suppresses_pending_flush() {
        let (merger, mut rx) = merger(true, 30);
        merger.ingest("s1".into(), chunk("doomed")).await;
        merger.shutdown().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sessions_buffer_independently() {
        let (merger, mut rx) = merger(true, 10);
        merger.ingest("s1".into(), chunk("one")).await;
        merger.ingest("s2".into(), chunk("two")).await;

        let mut texts = vec![
            rx.recv().await.unwrap().message_chunks[0]
                .as_text()
                .unwrap()
                .to_string(),
            rx.recv().await.unwrap().message_chunks[0]
                .as_text()
                .unwrap()
                .to_string(),
        ];
        texts.sort();
        assert_eq!(texts, vec!["one", "two"]);
    }
}
