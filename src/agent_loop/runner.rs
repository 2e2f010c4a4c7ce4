//! The agent loop: model call, tool dispatch, repeat.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LoopConfig;
use crate::conversation::{
    estimate_text_tokens, Checkpoint, ConversationState, ExtractiveSummarizer, Summarizer,
};
use crate::error::TetherError;
use crate::provider::{ModelProvider, ProviderRequest, ProviderResponse, ResponseAssembler};
use crate::registry::ToolRegistry;
use crate::trace::{TraceEmitter, TraceEventKind, TraceRecorder};
use crate::util::usage::UsageTracker;

use super::dispatch::Dispatch;
use super::events::{EventSink, SessionEvent};
use super::state::LoopState;

/// Drives one conversation session.
///
/// Each user message moves the loop through
/// `AwaitingLlm -> DispatchingTools -> AwaitingLlm -> ... -> Done`. A model
/// failure, an exhausted iteration budget or a broken invariant moves it to
/// `Failed`, after which every message is rejected with
/// [`TetherError::SessionTerminated`]. Cancellation restores the history as
/// it was before the message and returns the loop to `Idle`. So does the next
/// message after a [`AgentLoop::run_turn`] future was dropped mid-message.
pub struct AgentLoop {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    config: LoopConfig,
    summarizer: Arc<dyn Summarizer>,
    conversation: ConversationState,
    usage: UsageTracker,
    trace: TraceRecorder,
    state: LoopState,
    failure: Option<String>,
    /// History before the message in flight; left behind if its future is dropped.
    in_flight: Option<Checkpoint>,
    turn_index: usize,
    memory_loaded: bool,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        mut config: LoopConfig,
        emitter: Arc<dyn TraceEmitter>,
    ) -> Self {
        config.max_iterations = config.max_iterations.max(1);
        Self {
            provider,
            registry,
            config,
            summarizer: Arc::new(ExtractiveSummarizer::default()),
            conversation: ConversationState::new(),
            usage: UsageTracker::new(),
            trace: TraceRecorder::new(Uuid::new_v4(), emitter),
            state: LoopState::Idle,
            failure: None,
            in_flight: None,
            turn_index: 0,
            memory_loaded: false,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.trace.session_id()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Use a rebuilt registry from the next message on.
    pub fn set_registry(&mut self, registry: Arc<ToolRegistry>) {
        self.registry = registry;
    }

    /// Flush the trace emitter.
    pub fn flush(&self) {
        self.trace.flush();
    }

    /// Handle one user message and return the final answer.
    pub async fn run_turn(
        &mut self,
        text: &str,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<String, TetherError> {
        if self.state == LoopState::Failed {
            let error = TetherError::SessionTerminated(
                self.failure
                    .clone()
                    .unwrap_or_else(|| "session failed".into()),
            );
            sink.emit(SessionEvent::error(&error, true));
            return Err(error);
        }
        self.recover_abandoned_message();
        if !self.state.accepts_message() {
            let error = TetherError::InvalidState(format!(
                "cannot accept a message while {}",
                self.state
            ));
            sink.emit(SessionEvent::error(&error, true));
            return Err(error);
        }

        self.load_memory().await;
        self.turn_index += 1;
        self.in_flight = Some(self.conversation.checkpoint());

        let outcome = self.drive(text, sink, cancel).await;
        let checkpoint = self.in_flight.take();
        match outcome {
            Ok(answer) => Ok(answer),
            Err(TetherError::Canceled) => {
                if let Some(checkpoint) = checkpoint {
                    self.conversation.rollback(checkpoint);
                }
                self.trace.record(
                    TraceEventKind::Error,
                    "message canceled",
                    json!({ "turn": self.turn_index, "kind": "canceled" }),
                );
                self.transition(LoopState::Idle, "canceled");
                tracing::info!(session_id = %self.session_id(), turn = self.turn_index, "Message canceled; history restored");
                sink.emit(SessionEvent::error(&TetherError::Canceled, true));
                Err(TetherError::Canceled)
            }
            Err(error) => {
                if matches!(error, TetherError::ProtocolViolation(_)) {
                    tracing::error!(session_id = %self.session_id(), error = %error, "Conversation invariant broken");
                } else {
                    tracing::warn!(session_id = %self.session_id(), error = %error, "Session failed");
                }
                self.trace.record(
                    TraceEventKind::Error,
                    error.to_string(),
                    json!({ "turn": self.turn_index, "kind": error.kind(), "terminal": true }),
                );
                self.failure = Some(error.to_string());
                self.transition(LoopState::Failed, "terminal error");
                sink.emit(SessionEvent::error(&error, true));
                Err(error)
            }
        }
    }

    /// Undo a message whose future was dropped before it finished.
    fn recover_abandoned_message(&mut self) {
        let Some(checkpoint) = self.in_flight.take() else {
            return;
        };
        self.conversation.rollback(checkpoint);
        self.trace.record(
            TraceEventKind::Error,
            "message abandoned",
            json!({ "turn": self.turn_index, "kind": "canceled", "state": self.state }),
        );
        tracing::warn!(session_id = %self.session_id(), state = %self.state, turn = self.turn_index, "Previous message was abandoned; history restored");
        if matches!(self.state, LoopState::AwaitingLlm | LoopState::DispatchingTools) {
            self.transition(LoopState::Idle, "abandoned");
        }
    }

    async fn drive(
        &mut self,
        text: &str,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<String, TetherError> {
        self.conversation.append_user(text)?;
        self.transition(LoopState::AwaitingLlm, "user message");

        let max_iterations = self.config.max_iterations.max(1);
        for iteration in 1..=max_iterations {
            let response = self.call_model(iteration, sink, cancel).await?;

            if !response.has_tool_calls() {
                self.conversation
                    .append_assistant(response.text.clone(), Vec::new())?;
                self.transition(LoopState::Done, "final answer");
                sink.emit(SessionEvent::FinalText {
                    text: response.text.clone(),
                });
                return Ok(response.text);
            }

            if iteration == max_iterations {
                break;
            }

            let calls = response.tool_calls;
            self.conversation
                .append_assistant(response.text, calls.clone())?;
            self.transition(LoopState::DispatchingTools, "tool calls requested");

            let results = Dispatch {
                registry: &self.registry,
                tool_timeout: self.config.tool_timeout,
                cancel_grace: self.config.cancel_grace,
                max_result_chars: self.config.max_result_chars,
                trace: &self.trace,
                sink,
                cancel,
            }
            .run(&calls)
            .await?;

            self.conversation.append_tool_results(results)?;
            self.transition(LoopState::AwaitingLlm, "tool results appended");
        }

        Err(TetherError::IterationLimit { max_iterations })
    }

    async fn call_model(
        &mut self,
        iteration: usize,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, TetherError> {
        if self.conversation.has_pending_tool_calls() {
            return Err(TetherError::ProtocolViolation(
                "model called with unresolved tool calls".into(),
            ));
        }
        self.compact_history().await;

        let request = ProviderRequest {
            system_prompt: Some(self.config.system_prompt.clone()),
            turns: self.conversation.snapshot(),
            tools: self.registry.schema(),
        };
        let estimate = request.estimate_tokens();
        tracing::debug!(
            session_id = %self.session_id(),
            iteration,
            system_prompt = estimate.system_prompt,
            tool_schema = estimate.tool_schema,
            history = estimate.history,
            total = estimate.total(),
            "Estimated input tokens"
        );

        let call_id = format!("turn-{}/llm-{iteration}", self.turn_index);
        self.trace.record(
            TraceEventKind::LlmCallStarted,
            format!("model call {call_id}"),
            json!({
                "call_id": call_id,
                "iteration": iteration,
                "turns": request.turns.len(),
                "tools": request.tools.len(),
                "estimated_input_tokens": estimate.total(),
            }),
        );

        let provider = Arc::clone(&self.provider);
        let streaming = self.config.streaming;
        let request = &request;
        let attempt = self.config.llm_retry.execute(|| {
            let provider = Arc::clone(&provider);
            async move {
                if streaming {
                    let stream = provider.stream_text(request).await?;
                    ResponseAssembler::collect(stream, |text| {
                        sink.emit(SessionEvent::PartialText {
                            text: text.to_string(),
                        })
                    })
                    .await
                } else {
                    let response = provider.generate_text(request).await?;
                    response.validate_tool_calls()?;
                    Ok(response)
                }
            }
        });

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TetherError::Canceled),
            response = attempt => response?,
        };

        if !streaming && !response.text.is_empty() {
            sink.emit(SessionEvent::PartialText {
                text: response.text.clone(),
            });
        }
        self.usage.record(call_id.clone(), response.usage);
        self.trace.record(
            TraceEventKind::LlmCallFinished,
            format!("model call {call_id} finished"),
            json!({
                "call_id": call_id,
                "input_tokens": response.usage.input_tokens,
                "output_tokens": response.usage.output_tokens,
                "tool_calls": response.tool_calls.len(),
            }),
        );
        Ok(response)
    }

    /// Evict old exchanges that no longer fit and fold them into the summary.
    async fn compact_history(&mut self) {
        let reserved = estimate_text_tokens(&self.config.system_prompt)
            + self
                .registry
                .schema()
                .iter()
                .map(|tool| tool.estimated_tokens())
                .sum::<usize>();
        let evicted = self
            .conversation
            .truncate(&self.config.truncation, reserved);
        if evicted.is_empty() {
            return;
        }

        let previous = self.conversation.summary().map(str::to_string);
        match self
            .summarizer
            .summarize(previous.as_deref(), &evicted)
            .await
        {
            Ok(outcome) => {
                if let Some(usage) = outcome.usage {
                    self.usage
                        .record(format!("turn-{}/summary", self.turn_index), usage);
                }
                self.conversation.set_summary(Some(outcome.text));
            }
            Err(error) => {
                tracing::warn!(error = %error, "Summarization failed; keeping previous summary");
            }
        }

        tracing::debug!(
            session_id = %self.session_id(),
            evicted = evicted.len(),
            remaining = self.conversation.len(),
            "History truncated"
        );
        self.trace.record(
            TraceEventKind::HistoryTruncated,
            format!("evicted {} turns", evicted.len()),
            json!({
                "evicted": evicted.len(),
                "remaining": self.conversation.len(),
                "summary_chars": self.conversation.summary().map(|s| s.chars().count()),
            }),
        );

        if let (Some(binding), Some(summary)) = (&self.config.memory, self.conversation.summary()) {
            binding
                .store(&self.registry, summary, self.config.tool_timeout)
                .await;
        }
    }

    async fn load_memory(&mut self) {
        if self.memory_loaded {
            return;
        }
        self.memory_loaded = true;
        let Some(binding) = &self.config.memory else {
            return;
        };
        if let Some(summary) = binding
            .retrieve(&self.registry, self.config.tool_timeout)
            .await
        {
            tracing::info!(chars = summary.chars().count(), "Retrieved previous context from memory");
            self.conversation.set_summary(Some(summary));
        }
    }

    fn transition(&mut self, next: LoopState, reason: &str) {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            tracing::error!(from = %previous, to = %next, "Unexpected loop state transition");
        }
        self.state = next;
        tracing::debug!(session_id = %self.session_id(), from = %previous, to = %next, reason, "Loop state transition");
        self.trace.record(
            TraceEventKind::StateTransition,
            format!("{previous} -> {next}"),
            json!({ "from": previous, "to": next, "reason": reason, "turn": self.turn_index }),
        );
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("session_id", &self.session_id())
            .field("provider", &self.provider.provider_name())
            .field("model", &self.provider.model_id())
            .field("state", &self.state)
            .field("turns", &self.conversation.len())
            .field("tools", &self.registry.len())
            .finish()
    }
}
