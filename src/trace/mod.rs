//! Structured trace events emitted at every agent loop transition.
//!
//! The loop never touches global state for tracing: a [`TraceEmitter`] is
//! handed to it at construction, and flushed when the session shuts down.

mod emitters;

pub use emitters::{FanoutTraceEmitter, MemoryTraceEmitter, TracingTraceEmitter};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TraceEventKind {
    StateTransition,
    LlmCallStarted,
    LlmCallFinished,
    ToolCallStarted,
    ToolCallFinished,
    HistoryTruncated,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub session_id: Uuid,
    /// Strictly increasing within a session, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: TraceEventKind,
    /// One-line human-readable description.
    pub summary: String,
    pub payload: serde_json::Value,
}

/// Sink for trace events.
pub trait TraceEmitter: Send + Sync {
    fn emit(&self, event: &TraceEvent);

    /// Push buffered events out. Called when a session shuts down.
    fn flush(&self) {}
}

/// Stamps events with session id, sequence number and time before handing
/// them to the emitter.
pub(crate) struct TraceRecorder {
    session_id: Uuid,
    seq: AtomicU64,
    emitter: Arc<dyn TraceEmitter>,
}

impl TraceRecorder {
    pub(crate) fn new(session_id: Uuid, emitter: Arc<dyn TraceEmitter>) -> Self {
        Self {
            session_id,
            seq: AtomicU64::new(1),
            emitter,
        }
    }

    pub(crate) fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub(crate) fn record(
        &self,
        kind: TraceEventKind,
        summary: impl Into<String>,
        payload: serde_json::Value,
    ) {
        let event = TraceEvent {
            session_id: self.session_id,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            kind,
            summary: summary.into(),
            payload,
        };
        self.emitter.emit(&event);
    }

    pub(crate) fn flush(&self) {
        self.emitter.flush();
    }
}
