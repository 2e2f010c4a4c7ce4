//! Folding evicted turns into a running summary.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TetherError;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::types::{ConversationTurn, Usage};

const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise summaries.";
const SUMMARY_INSTRUCTION: &str =
    "Summarize the following conversation in 2-3 sentences, focusing on key information and context:";
const DEFAULT_MAX_SUMMARY_CHARS: usize = 1200;
const EXCERPT_CHARS: usize = 160;

/// A new summary, plus the usage of the model call that produced it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub text: String,
    pub usage: Option<Usage>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Combine the previous summary with newly evicted turns.
    async fn summarize(
        &self,
        previous: Option<&str>,
        evicted: &[ConversationTurn],
    ) -> Result<SummaryOutcome, TetherError>;
}

/// Deterministic summary built from excerpts of the evicted turns.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_SUMMARY_CHARS,
        }
    }
}

impl ExtractiveSummarizer {
    pub fn with_max_chars(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn summarize_now(&self, previous: Option<&str>, evicted: &[ConversationTurn]) -> String {
        let mut parts: Vec<String> = previous
            .filter(|summary| !summary.trim().is_empty())
            .map(|summary| vec![summary.trim().to_string()])
            .unwrap_or_default();

        for turn in evicted {
            match turn {
                ConversationTurn::User { text, .. } => {
                    parts.push(format!("User asked: {}.", excerpt(text)));
                }
                ConversationTurn::Assistant {
                    text, tool_calls, ..
                } => {
                    if !tool_calls.is_empty() {
                        let names: Vec<&str> =
                            tool_calls.iter().map(|call| call.name.as_str()).collect();
                        parts.push(format!("Assistant used {}.", names.join(", ")));
                    }
                    if !text.trim().is_empty() {
                        parts.push(format!("Assistant answered: {}.", excerpt(text)));
                    }
                }
                ConversationTurn::ToolResults { results, .. } => {
                    let failed = results.iter().filter(|r| r.is_error()).count();
                    if failed > 0 {
                        parts.push(format!("{failed} tool call(s) failed."));
                    }
                }
            }
        }

        keep_tail(&parts.join(" "), self.max_chars)
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(
        &self,
        previous: Option<&str>,
        evicted: &[ConversationTurn],
    ) -> Result<SummaryOutcome, TetherError> {
        Ok(SummaryOutcome {
            text: self.summarize_now(previous, evicted),
            usage: None,
        })
    }
}

/// Asks the model for a short summary; falls back to the extractive summary
/// when the call fails or returns nothing.
pub struct ModelSummarizer {
    provider: Arc<dyn ModelProvider>,
    fallback: ExtractiveSummarizer,
}

impl ModelSummarizer {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            fallback: ExtractiveSummarizer::default(),
        }
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(
        &self,
        previous: Option<&str>,
        evicted: &[ConversationTurn],
    ) -> Result<SummaryOutcome, TetherError> {
        let request = ProviderRequest {
            system_prompt: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            turns: vec![ConversationTurn::user(format!(
                "{SUMMARY_INSTRUCTION}\n\n{}",
                transcript(previous, evicted)
            ))],
            tools: Vec::new(),
        };

        match self.provider.generate_text(&request).await {
            Ok(response) if !response.text.trim().is_empty() => Ok(SummaryOutcome {
                text: response.text.trim().to_string(),
                usage: Some(response.usage),
            }),
            Ok(response) => {
                tracing::warn!("Model returned an empty summary; using extractive summary");
                Ok(SummaryOutcome {
                    text: self.fallback.summarize_now(previous, evicted),
                    usage: Some(response.usage),
                })
            }
            Err(error) => {
                tracing::warn!(error = %error, "Summary generation failed; using extractive summary");
                Ok(SummaryOutcome {
                    text: self.fallback.summarize_now(previous, evicted),
                    usage: None,
                })
            }
        }
    }
}

fn transcript(previous: Option<&str>, evicted: &[ConversationTurn]) -> String {
    let mut lines = Vec::new();
    if let Some(summary) = previous {
        lines.push(format!("Earlier context: {summary}"));
    }
    for turn in evicted {
        match turn {
            ConversationTurn::User { text, .. } => lines.push(format!("user: {text}")),
            ConversationTurn::Assistant { text, .. } if !text.is_empty() => {
                lines.push(format!("assistant: {text}"))
            }
            ConversationTurn::Assistant { .. } => {}
            ConversationTurn::ToolResults { results, .. } => {
                for result in results {
                    lines.push(format!("tool {}: {}", result.tool_name, result.output_text()));
                }
            }
        }
    }
    lines.join("\n")
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}...")
}

fn keep_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
