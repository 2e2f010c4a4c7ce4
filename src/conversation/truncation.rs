//! Token estimates and the eviction plan used under budget pressure.

use serde::{Deserialize, Serialize};

use crate::types::{ConversationTurn, Role};

const DEFAULT_MAX_TURNS: usize = 20;
const TURN_OVERHEAD_TOKENS: usize = 4;
const TOOL_PART_OVERHEAD_TOKENS: usize = 8;

/// Limits applied to the history before each model call.
///
/// Eviction works on whole exchanges: a user turn plus every assistant and
/// tool-result turn that follows it. Oldest exchanges go first and the most
/// recent exchange is always kept, so an assistant turn is never separated
/// from its tool results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationPolicy {
    /// Estimated token budget for prompt, tool schema and history together.
    pub max_tokens: Option<usize>,
    /// Maximum number of turns kept in the history.
    pub max_turns: Option<usize>,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self {
            max_tokens: None,
            max_turns: Some(DEFAULT_MAX_TURNS),
        }
    }
}

impl TruncationPolicy {
    /// Never evict anything.
    pub fn unbounded() -> Self {
        Self {
            max_tokens: None,
            max_turns: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_tokens.is_none() && self.max_turns.is_none()
    }

    fn fits(&self, turns: usize, tokens: usize) -> bool {
        self.max_turns.map_or(true, |max| turns <= max)
            && self.max_tokens.map_or(true, |max| tokens <= max)
    }
}

pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

pub fn estimate_turn_tokens(turn: &ConversationTurn) -> usize {
    let mut tokens = TURN_OVERHEAD_TOKENS + estimate_text_tokens(turn.text());
    match turn {
        ConversationTurn::Assistant { tool_calls, .. } => {
            for call in tool_calls {
                tokens += estimate_text_tokens(&call.name)
                    + estimate_text_tokens(&call.arguments.to_string())
                    + TOOL_PART_OVERHEAD_TOKENS;
            }
        }
        ConversationTurn::ToolResults { results, .. } => {
            for result in results {
                tokens += estimate_text_tokens(&result.call_id)
                    + estimate_text_tokens(&result.output_text())
                    + TOOL_PART_OVERHEAD_TOKENS;
            }
        }
        ConversationTurn::User { .. } => {}
    }
    tokens
}

pub fn estimate_turns_tokens(turns: &[ConversationTurn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum()
}

/// Indices at which exchanges begin.
pub(crate) fn exchange_starts(turns: &[ConversationTurn]) -> Vec<usize> {
    let mut starts: Vec<usize> = turns
        .iter()
        .enumerate()
        .filter(|(_, turn)| turn.role() == Role::User)
        .map(|(idx, _)| idx)
        .collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    starts
}

/// Number of leading turns to evict so the remainder fits `policy`.
///
/// `reserved_tokens` covers everything sent besides the history (system
/// prompt, tool schema, running summary). When even the last exchange alone
/// does not fit, everything before it is evicted and the overflow is left to
/// the caller.
pub(crate) fn eviction_cut(
    turns: &[ConversationTurn],
    policy: &TruncationPolicy,
    reserved_tokens: usize,
) -> usize {
    if turns.is_empty() || policy.is_unbounded() {
        return 0;
    }

    let per_turn: Vec<usize> = turns.iter().map(estimate_turn_tokens).collect();
    let total: usize = per_turn.iter().sum();
    let starts = exchange_starts(turns);

    let mut evicted_tokens = 0usize;
    let mut previous = 0usize;
    for &cut in &starts {
        evicted_tokens += per_turn[previous..cut].iter().sum::<usize>();
        previous = cut;
        let kept_turns = turns.len() - cut;
        let kept_tokens = reserved_tokens + (total - evicted_tokens);
        if policy.fits(kept_turns, kept_tokens) {
            return cut;
        }
    }

    starts.last().copied().unwrap_or(0)
}
