//! Usage tracking across model calls.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::usage::{Usage, UsageRecord, UsageTotals};

/// Append-only log of per-call token usage.
///
/// Clones share the same log, so a presentation layer can hold a read handle
/// while the agent loop records into it.
#[derive(Clone, Default)]
pub struct UsageTracker {
    inner: Arc<RwLock<Vec<UsageRecord>>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a usage record for one model call.
    pub fn record(&self, call_id: impl Into<String>, usage: Usage) -> UsageRecord {
        let record = UsageRecord::new(call_id, usage);
        self.write().push(record.clone());
        record
    }

    /// Sum of all records; saturates instead of overflowing.
    pub fn session_total(&self) -> UsageTotals {
        let records = self.read();
        let mut usage = Usage::default();
        for record in records.iter() {
            usage.merge(&record.usage());
        }
        UsageTotals {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens(),
            calls: records.len() as u64,
        }
    }

    /// Every record, in append order.
    pub fn per_call_breakdown(&self) -> Vec<UsageRecord> {
        self.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<UsageRecord>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<UsageRecord>> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("calls", &self.call_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_all_records() {
        let tracker = UsageTracker::new();
        tracker.record("turn-1/llm-1", Usage::new(100, 20));
        tracker.record("turn-1/llm-2", Usage::new(150, 30));

        let totals = tracker.session_total();
        assert_eq!(totals.input_tokens, 250);
        assert_eq!(totals.output_tokens, 50);
        assert_eq!(totals.total_tokens, 300);
        assert_eq!(totals.calls, 2);

        let breakdown = tracker.per_call_breakdown();
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].call_id, "turn-1/llm-1");
        assert_eq!(breakdown[1].input_tokens, 150);
    }

    #[test]
    fn totals_saturate_on_extreme_counts() {
        let tracker = UsageTracker::new();
        tracker.record("a", Usage::new(u64::MAX, u64::MAX));
        tracker.record("b", Usage::new(5, 5));

        let totals = tracker.session_total();
        assert_eq!(totals.input_tokens, u64::MAX);
        assert_eq!(totals.output_tokens, u64::MAX);
        assert_eq!(totals.total_tokens, u64::MAX);
    }

    #[test]
    fn clones_share_the_log() {
        let tracker = UsageTracker::new();
        let reader = tracker.clone();
        tracker.record("a", Usage::new(1, 2));
        assert_eq!(reader.call_count(), 1);
    }
}
