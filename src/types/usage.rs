//! Token usage types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token usage reported for one model call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Merge another usage into this one (accumulate, saturating).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Append-only usage log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageRecord {
    /// Identifies the model call, e.g. `turn-3/llm-2`.
    pub call_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(call_id: impl Into<String>, usage: Usage) -> Self {
        Self {
            call_id: call_id.into(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            timestamp: Utc::now(),
        }
    }

    pub fn usage(&self) -> Usage {
        Usage::new(self.input_tokens, self.output_tokens)
    }
}

/// Running totals over a usage log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub calls: u64,
}
