//! Per-session state held by the engine

use crate::types::{
    LoadSessionResponse, ModeState, ModelState, NewSessionResponse, SessionUpdate, StopReason,
};
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

/// State for the engine's current session, valid for one connection.
#[derive(Debug)]
pub struct SessionState {
    pub id: String,
    pub modes: Option<ModeState>,
    pub models: Option<ModelState>,
    pub stats: PromptStats,
}

impl SessionState {
    pub fn from_new(response: &NewSessionResponse) -> Self {
        Self {
            id: response.session_id.clone(),
            modes: response.modes.clone(),
            models: response.models.clone(),
            stats: PromptStats::default(),
        }
    }

    pub fn from_load(response: &LoadSessionResponse) -> Self {
        Self {
            id: response.session_id.clone(),
            modes: response.modes.clone(),
            models: response.models.clone(),
            stats: PromptStats::default(),
        }
    }

    pub fn set_current_mode(&mut self, mode_id: &str) {
        self.modes
            .get_or_insert_with(ModeState::default)
            .current_mode_id = Some(mode_id.to_string());
    }

    pub fn set_current_model(&mut self, model_id: &str) {
        self.models
            .get_or_insert_with(ModelState::default)
            .current_model_id = Some(model_id.to_string());
    }

    /// Fold streamed mode state into the cached snapshot.
    pub fn absorb_update(&mut self, update: &SessionUpdate) {
        if let Some(modes) = &update.modes {
            let cached = self.modes.get_or_insert_with(ModeState::default);
            if !modes.available_modes.is_empty() {
                cached.available_modes = modes.available_modes.clone();
            }
            if modes.current_mode_id.is_some() {
                cached.current_mode_id = modes.current_mode_id.clone();
            }
        }
    }
}

/// Timing counters for the current prompt turn, populated only when the
/// timing instrumentation is enabled.
#[derive(Debug, Default)]
pub struct PromptStats {
    turn_seq: u64,
    started: Option<Instant>,
    first_chunk_ms: Option<u64>,
    first_tool_call_ms: Option<u64>,
    chunk_count: u64,
    byte_count: u64,
    tool_call_started: HashMap<String, Instant>,
}

impl PromptStats {
    pub fn begin_turn(&mut self) -> u64 {
        self.turn_seq += 1;
        self.started = Some(Instant::now());
        self.first_chunk_ms = None;
        self.first_tool_call_ms = None;
        self.chunk_count = 0;
        self.byte_count = 0;
        self.tool_call_started.clear();
        self.turn_seq
    }

    pub fn record_update(&mut self, update: &SessionUpdate) {
        let Some(started) = self.started else {
            return;
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        for chunk in &update.message_chunks {
            if self.first_chunk_ms.is_none() {
                self.first_chunk_ms = Some(elapsed_ms);
            }
            self.chunk_count += 1;
            self.byte_count += chunk.byte_len() as u64;
        }

        for call in &update.tool_calls {
            if self.first_tool_call_ms.is_none() {
                self.first_tool_call_ms = Some(elapsed_ms);
            }
            if call.status.is_terminal() {
                if let Some(t0) = self.tool_call_started.remove(&call.id) {
                    info!(
                        tool_call_id = %call.id,
                        status = ?call.status,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "tool call finished"
                    );
                }
            } else {
                self.tool_call_started
                    .entry(call.id.clone())
                    .or_insert_with(Instant::now);
            }
        }
    }

    pub fn finish_turn(&mut self, stop_reason: Option<StopReason>) {
        let Some(started) = self.started.take() else {
            return;
        };
        info!(
            turn = self.turn_seq,
            elapsed_ms = started.elapsed().as_millis() as u64,
            first_chunk_ms = self.first_chunk_ms,
            first_tool_call_ms = self.first_tool_call_ms,
            chunks = self.chunk_count,
            bytes = self.byte_count,
            stop_reason = ?stop_reason,
            "prompt turn finished"
        );
        self.tool_call_started.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, ToolCallSnapshot, ToolCallStatus};

    fn update_with_chunk(text: &str) -> SessionUpdate {
        SessionUpdate {
            message_chunks: vec![ContentBlock::text(text)],
            ..Default::default()
        }
    }

    #[test]
    fn test_turn_sequence_increments() {
        let mut stats = PromptStats::default();
        assert_eq!(stats.begin_turn(), 1);
        stats.finish_turn(Some(StopReason::EndTurn));
        assert_eq!(stats.begin_turn(), 2);
    }

    #[test]
    fn test_counters_accumulate() {
        let mut stats = PromptStats::default();
        stats.begin_turn();
        stats.record_update(&update_with_chunk("hello"));
        stats.record_update(&update_with_chunk("world"));
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.byte_count, 10);
        assert!(stats.first_chunk_ms.is_some());
    }

    #[test]
    fn test_updates_outside_turn_are_ignored() {
        let mut stats = PromptStats::default();
        stats.record_update(&update_with_chunk("stray"));
        assert_eq!(stats.chunk_count, 0);
    }

    #[test]
    fn test_tool_call_span_tracking() {
        let mut stats = PromptStats::default();
        stats.begin_turn();

        let mut update = SessionUpdate::default();
        update.tool_calls.push(ToolCallSnapshot {
            id: "t1".into(),
            title: None,
            status: ToolCallStatus::Running,
            raw_input: None,
            result: None,
            error: None,
        });
        stats.record_update(&update);
        assert!(stats.tool_call_started.contains_key("t1"));

        update.tool_calls[0].status = ToolCallStatus::Complete;
        stats.record_update(&update);
        assert!(!stats.tool_call_started.contains_key("t1"));
    }

    #[test]
    fn test_absorb_mode_update() {
        let mut session = SessionState {
            id: "s1".into(),
            modes: None,
            models: None,
            stats: PromptStats::default(),
        };
        session.absorb_update(&SessionUpdate {
            modes: Some(ModeState {
                available_modes: vec![],
                current_mode_id: Some("architect".into()),
            }),
            ..Default::default()
        });
        assert_eq!(
            session.modes.unwrap().current_mode_id.as_deref(),
            Some("architect")
        );
    }
}
