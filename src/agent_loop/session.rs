//! The handle front-ends hold for one conversation.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LoopConfig;
use crate::conversation::{ConversationState, Summarizer};
use crate::error::TetherError;
use crate::provider::ModelProvider;
use crate::registry::ToolRegistry;
use crate::trace::{FanoutTraceEmitter, MemoryTraceEmitter, TraceEmitter, TraceEvent, TracingTraceEmitter};
use crate::types::{UsageRecord, UsageTotals};
use crate::util::usage::UsageTracker;

use super::events::{EventSink, SessionEvent};
use super::runner::AgentLoop;
use super::state::LoopState;

/// Optional collaborators for [`Session::with_options`].
#[derive(Default)]
pub struct SessionOptions {
    /// Receives every trace event besides the session's own log. Defaults to
    /// [`TracingTraceEmitter`].
    pub emitter: Option<Arc<dyn TraceEmitter>>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

/// One conversation, shareable between tasks.
///
/// Messages are processed strictly in order: a message sent while another is
/// in flight waits for it to finish.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<AgentLoop>>,
    current: Arc<StdMutex<Option<CancellationToken>>>,
    trace_log: MemoryTraceEmitter,
    usage: UsageTracker,
    session_id: Uuid,
}

impl Session {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        config: LoopConfig,
    ) -> Self {
        Self::with_options(provider, registry, config, SessionOptions::default())
    }

    pub fn with_options(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        config: LoopConfig,
        options: SessionOptions,
    ) -> Self {
        let trace_log = MemoryTraceEmitter::new();
        let emitter = FanoutTraceEmitter::new(vec![
            Arc::new(trace_log.clone()) as Arc<dyn TraceEmitter>,
            options
                .emitter
                .unwrap_or_else(|| Arc::new(TracingTraceEmitter) as Arc<dyn TraceEmitter>),
        ]);
        let mut agent = AgentLoop::new(provider, registry, config, Arc::new(emitter));
        if let Some(summarizer) = options.summarizer {
            agent = agent.with_summarizer(summarizer);
        }
        Self {
            usage: agent.usage().clone(),
            session_id: agent.session_id(),
            inner: Arc::new(Mutex::new(agent)),
            current: Arc::new(StdMutex::new(None)),
            trace_log,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Process `text` in the background, streaming events until a
    /// [`SessionEvent::FinalText`] or terminal [`SessionEvent::Error`].
    pub fn send_message(&self, text: impl Into<String>) -> UnboundedReceiverStream<SessionEvent> {
        let (sink, rx) = EventSink::channel();
        let session = self.clone();
        let text = text.into();
        tokio::spawn(async move {
            let _ = session.send_message_with(&text, &sink).await;
        });
        UnboundedReceiverStream::new(rx)
    }

    /// Process `text`, reporting events to `sink`, and return the answer.
    ///
    /// The message runs on its own task. Dropping the returned future cancels
    /// it: the history is restored and `sink` receives the terminal
    /// [`SessionEvent::Error`].
    pub async fn send_message_with(
        &self,
        text: &str,
        sink: &EventSink,
    ) -> Result<String, TetherError> {
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        let inner = Arc::clone(&self.inner);
        let current = Arc::clone(&self.current);
        let text = text.to_string();
        let sink = sink.clone();

        let turn = tokio::spawn(async move {
            let mut agent = inner.lock_owned().await;
            *lock_slot(&current) = Some(token.clone());
            let result = agent.run_turn(&text, &sink, &token).await;
            *lock_slot(&current) = None;
            result
        });
        let outcome = turn.await;
        guard.disarm();
        outcome.map_err(|error| TetherError::InvalidState(format!("message task failed: {error}")))?
    }

    /// Cancel the message being processed, if any.
    pub fn cancel(&self) -> bool {
        match self.lock_current().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn usage_summary(&self) -> UsageTotals {
        self.usage.session_total()
    }

    pub fn usage_breakdown(&self) -> Vec<UsageRecord> {
        self.usage.per_call_breakdown()
    }

    pub fn trace_log(&self) -> Vec<TraceEvent> {
        self.trace_log.events()
    }

    /// Copy of the history. Waits for an in-flight message.
    pub async fn conversation(&self) -> ConversationState {
        self.inner.lock().await.conversation().clone()
    }

    pub async fn state(&self) -> LoopState {
        self.inner.lock().await.state()
    }

    /// Use a rebuilt registry for subsequent messages.
    pub async fn set_registry(&self, registry: Arc<ToolRegistry>) {
        self.inner.lock().await.set_registry(registry);
    }

    /// Flush trace emitters.
    pub async fn close(&self) {
        self.inner.lock().await.flush();
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        lock_slot(&self.current)
    }
}

fn lock_slot(slot: &StdMutex<Option<CancellationToken>>) -> MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("usage", &self.usage.session_total())
            .finish_non_exhaustive()
    }
}
