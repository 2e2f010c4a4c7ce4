//! Ordered conversation history with tool-call pairing enforcement.

pub mod summarizer;
pub mod truncation;

pub use summarizer::{ExtractiveSummarizer, ModelSummarizer, Summarizer, SummaryOutcome};
pub use truncation::{
    estimate_text_tokens, estimate_turn_tokens, estimate_turns_tokens, TruncationPolicy,
};

use std::collections::{HashMap, HashSet};

use crate::error::TetherError;
use crate::types::{ConversationTurn, ToolCallRequest, ToolCallResult};

/// Rendered in front of the first kept user turn while a summary exists.
pub fn summary_prefix(summary: &str) -> String {
    format!("[Previous conversation context: {summary}]\n\n")
}

/// Saved copy of the history, restored on cancellation.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    turns: Vec<ConversationTurn>,
    summary: Option<String>,
}

/// The history exchanged with the model.
///
/// Every assistant turn with tool calls must be answered by a tool-result
/// turn carrying exactly one result per call before anything else is
/// appended. Violations are reported as [`TetherError::ProtocolViolation`].
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<ConversationTurn>,
    summary: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, text: impl Into<String>) -> Result<(), TetherError> {
        self.ensure_no_pending("user message")?;
        self.turns.push(ConversationTurn::user(text));
        Ok(())
    }

    pub fn append_assistant(
        &mut self,
        text: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Result<(), TetherError> {
        self.ensure_no_pending("assistant message")?;
        let mut seen = HashSet::with_capacity(tool_calls.len());
        for call in &tool_calls {
            if !seen.insert(call.id.as_str()) {
                return Err(TetherError::ProtocolViolation(format!(
                    "tool call id '{}' appears twice in one assistant turn",
                    call.id
                )));
            }
        }
        self.turns.push(ConversationTurn::assistant(text, tool_calls));
        Ok(())
    }

    /// Append the results for the pending tool calls.
    ///
    /// Results may arrive in any order; they are stored in request order.
    pub fn append_tool_results(
        &mut self,
        results: Vec<ToolCallResult>,
    ) -> Result<(), TetherError> {
        let pending = self.pending_tool_calls();
        if pending.is_empty() {
            return Err(TetherError::ProtocolViolation(
                "tool results appended without pending tool calls".into(),
            ));
        }
        if results.len() != pending.len() {
            return Err(TetherError::ProtocolViolation(format!(
                "expected {} tool results, got {}",
                pending.len(),
                results.len()
            )));
        }

        let mut by_id: HashMap<String, ToolCallResult> = HashMap::with_capacity(results.len());
        for result in results {
            if !pending.iter().any(|call| call.id == result.call_id) {
                return Err(TetherError::ProtocolViolation(format!(
                    "tool result for unknown call id '{}'",
                    result.call_id
                )));
            }
            let call_id = result.call_id.clone();
            if by_id.insert(call_id.clone(), result).is_some() {
                return Err(TetherError::ProtocolViolation(format!(
                    "duplicate tool result for call id '{call_id}'"
                )));
            }
        }

        let ordered = pending
            .iter()
            .filter_map(|call| by_id.remove(&call.id))
            .collect();
        self.turns.push(ConversationTurn::tool_results(ordered));
        Ok(())
    }

    /// Tool calls of the last assistant turn that still await results.
    pub fn pending_tool_calls(&self) -> &[ToolCallRequest] {
        match self.turns.last() {
            Some(turn) => turn.tool_calls(),
            None => &[],
        }
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        !self.pending_tool_calls().is_empty()
    }

    /// History as presented to the model, with the running summary folded
    /// into the first user turn.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        let mut turns = self.turns.clone();
        if let Some(summary) = self.summary.as_deref() {
            let first_user = turns
                .iter_mut()
                .find_map(|turn| match turn {
                    ConversationTurn::User { text, .. } => Some(text),
                    _ => None,
                });
            if let Some(text) = first_user {
                *text = format!("{}{text}", summary_prefix(summary));
            }
        }
        turns
    }

    /// Evict the oldest exchanges until the history fits `policy`.
    ///
    /// Returns the evicted turns, oldest first, for summarization.
    pub fn truncate(
        &mut self,
        policy: &TruncationPolicy,
        reserved_tokens: usize,
    ) -> Vec<ConversationTurn> {
        let reserved = reserved_tokens
            + self
                .summary
                .as_deref()
                .map(|summary| estimate_text_tokens(&summary_prefix(summary)))
                .unwrap_or(0);
        let cut = truncation::eviction_cut(&self.turns, policy, reserved);
        self.turns.drain(..cut).collect()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn set_summary(&mut self, summary: Option<String>) {
        self.summary = summary.filter(|s| !s.trim().is_empty());
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Estimated tokens of the history as sent, summary included.
    pub fn estimated_tokens(&self) -> usize {
        estimate_turns_tokens(&self.snapshot())
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            turns: self.turns.clone(),
            summary: self.summary.clone(),
        }
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.turns = checkpoint.turns;
        self.summary = checkpoint.summary;
    }

    fn ensure_no_pending(&self, what: &str) -> Result<(), TetherError> {
        let pending = self.pending_tool_calls();
        if pending.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = pending.iter().map(|call| call.id.as_str()).collect();
        Err(TetherError::ProtocolViolation(format!(
            "{what} appended while tool calls [{}] have no results",
            ids.join(", ")
        )))
    }
}
