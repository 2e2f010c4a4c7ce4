//! Events streamed to the presentation layer while a message is processed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ErrorKind, TetherError};
use crate::types::ToolCallResult;

/// What a front-end sees while a message is being handled.
///
/// A tool failure is reported as a non-terminal [`SessionEvent::Error`]: the
/// agent keeps going. A terminal error ends the message; for every kind but
/// [`ErrorKind::Canceled`] it also ends the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PartialText {
        text: String,
    },
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolCallFinished {
        result: ToolCallResult,
    },
    FinalText {
        text: String,
    },
    Error {
        kind: ErrorKind,
        terminal: bool,
        message: String,
    },
}

impl SessionEvent {
    pub fn error(error: &TetherError, terminal: bool) -> Self {
        Self::Error {
            kind: error.kind(),
            terminal,
            message: error.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalText { .. } | Self::Error { terminal: true, .. }
        )
    }
}

/// Callback receiving [`SessionEvent`]s.
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(SessionEvent) + Send + Sync>);

impl EventSink {
    pub fn new(f: impl Fn(SessionEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Discards everything.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// A sink feeding an unbounded channel. Events sent after the receiver
    /// is dropped are discarded.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        (self.0)(event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSink")
    }
}
