//! Configuration: loop settings with env overrides, and tool-server launch
//! descriptors.

pub mod servers;

pub use servers::{
    default_servers_path, load_servers, parse_servers_json, parse_servers_toml, InvocationPolicy,
    ServerLaunchDescriptor, ServerTransport,
};

use std::time::Duration;

use bon::Builder;

use crate::agent_loop::MemoryBinding;
use crate::conversation::TruncationPolicy;
use crate::util::retry::RetryPolicy;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools when appropriate. \
When you use a tool, the system will provide its output. \
Based on the tool output, provide a natural language response to the user.";

pub const ENV_MAX_ITERATIONS: &str = "TETHER_MAX_ITERATIONS";
pub const ENV_TOOL_TIMEOUT_MS: &str = "TETHER_TOOL_TIMEOUT_MS";
pub const ENV_CANCEL_GRACE_MS: &str = "TETHER_CANCEL_GRACE_MS";
pub const ENV_CONTEXT_BUDGET_TOKENS: &str = "TETHER_CONTEXT_BUDGET_TOKENS";
pub const ENV_MAX_TURNS: &str = "TETHER_MAX_TURNS";
pub const ENV_STREAMING: &str = "TETHER_STREAMING";

/// Settings for one [`AgentLoop`](crate::agent_loop::AgentLoop).
#[derive(Debug, Clone, Builder)]
pub struct LoopConfig {
    /// Model calls allowed per user message before the session fails. Zero
    /// counts as one.
    #[builder(default = 10)]
    pub max_iterations: usize,
    /// Per tool call, counted from when a serialized connection admits it.
    #[builder(default = Duration::from_secs(30))]
    pub tool_timeout: Duration,
    /// How long outstanding tool calls get to finish after a cancel.
    #[builder(default = Duration::from_secs(2))]
    pub cancel_grace: Duration,
    #[builder(default)]
    pub llm_retry: RetryPolicy,
    #[builder(default = true)]
    pub streaming: bool,
    #[builder(default = DEFAULT_SYSTEM_PROMPT.to_string(), into)]
    pub system_prompt: String,
    #[builder(default)]
    pub truncation: TruncationPolicy,
    /// Tool output longer than this many characters is cut.
    #[builder(default = 10_000)]
    pub max_result_chars: usize,
    pub memory: Option<MemoryBinding>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl LoopConfig {
    /// Defaults overridden from the environment (after loading `.env`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `TETHER_*` overrides read through `lookup`. Invalid and zero
    /// values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let positive = |key: &str| lookup(key).as_deref().and_then(parse_positive_usize);

        if let Some(value) = positive(ENV_MAX_ITERATIONS) {
            self.max_iterations = value;
        }
        if let Some(ms) = positive(ENV_TOOL_TIMEOUT_MS) {
            self.tool_timeout = Duration::from_millis(ms as u64);
        }
        if let Some(ms) = positive(ENV_CANCEL_GRACE_MS) {
            self.cancel_grace = Duration::from_millis(ms as u64);
        }
        if let Some(tokens) = positive(ENV_CONTEXT_BUDGET_TOKENS) {
            self.truncation.max_tokens = Some(tokens);
        }
        if let Some(turns) = positive(ENV_MAX_TURNS) {
            self.truncation.max_turns = Some(turns);
        }
        if let Some(streaming) = lookup(ENV_STREAMING).as_deref().and_then(parse_flag) {
            self.streaming = streaming;
        }
        self
    }
}

fn parse_positive_usize(value: &str) -> Option<usize> {
    let parsed = value.trim().parse::<usize>().ok()?;
    if parsed == 0 {
        None
    } else {
        Some(parsed)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = LoopConfig::default();
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.cancel_grace, Duration::from_secs(2));
        assert_eq!(config.max_result_chars, 10_000);
        assert!(config.streaming);
        assert!(config.memory.is_none());
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(config.truncation, TruncationPolicy::default());
    }

    #[test]
    fn builder_overrides_selected_fields() {
        let config = LoopConfig::builder()
            .max_iterations(3)
            .streaming(false)
            .system_prompt("Be terse.")
            .build();
        assert_eq!(config.max_iterations, 3);
        assert!(!config.streaming);
        assert_eq!(config.system_prompt, "Be terse.");
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_apply() {
        let config = LoopConfig::default().with_overrides(lookup(&[
            (ENV_MAX_ITERATIONS, "4"),
            (ENV_TOOL_TIMEOUT_MS, "1500"),
            (ENV_CANCEL_GRACE_MS, "250"),
            (ENV_CONTEXT_BUDGET_TOKENS, "8000"),
            (ENV_MAX_TURNS, "6"),
            (ENV_STREAMING, "off"),
        ]));
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.tool_timeout, Duration::from_millis(1500));
        assert_eq!(config.cancel_grace, Duration::from_millis(250));
        assert_eq!(config.truncation.max_tokens, Some(8000));
        assert_eq!(config.truncation.max_turns, Some(6));
        assert!(!config.streaming);
    }

    #[test]
    fn invalid_or_zero_env_values_are_ignored() {
        let config = LoopConfig::default().with_overrides(lookup(&[
            (ENV_MAX_ITERATIONS, "0"),
            (ENV_TOOL_TIMEOUT_MS, "soon"),
            (ENV_STREAMING, "maybe"),
        ]));
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert!(config.streaming);
    }
}
