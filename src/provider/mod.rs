//! The model capability consumed by the agent loop.
//!
//! A provider takes the conversation and the tool schema and answers with
//! text and/or tool-call requests, either in one piece ([`ModelProvider::generate_text`])
//! or as a stream of [`ResponseDelta`]s ([`ModelProvider::stream_text`]).
//! Concrete HTTP clients live outside this crate.

pub mod assemble;

pub use assemble::ResponseAssembler;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::conversation::{estimate_text_tokens, estimate_turns_tokens};
use crate::error::TetherError;
use crate::tools::ToolDefinition;
use crate::types::{ConversationTurn, ResponseDelta, ToolCallRequest, Usage};

pub type DeltaStream = BoxStream<'static, Result<ResponseDelta, TetherError>>;

/// A request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    pub system_prompt: Option<String>,
    pub turns: Vec<ConversationTurn>,
    /// Tool schema in registry order.
    pub tools: Vec<ToolDefinition>,
}

/// Estimated input tokens of a request, split by source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenEstimate {
    pub system_prompt: usize,
    pub tool_schema: usize,
    pub history: usize,
}

impl TokenEstimate {
    pub fn total(&self) -> usize {
        self.system_prompt + self.tool_schema + self.history
    }
}

impl ProviderRequest {
    pub fn estimate_tokens(&self) -> TokenEstimate {
        TokenEstimate {
            system_prompt: self
                .system_prompt
                .as_deref()
                .map(estimate_text_tokens)
                .unwrap_or(0),
            tool_schema: self.tools.iter().map(ToolDefinition::estimated_tokens).sum(),
            history: estimate_turns_tokens(&self.turns),
        }
    }
}

/// Response from a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

impl ProviderResponse {
    pub fn final_text(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            usage,
        }
    }

    pub fn with_tool_calls(
        text: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
        usage: Usage,
    ) -> Self {
        Self {
            text: text.into(),
            tool_calls,
            usage,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Reject tool calls without an id or name, and ids used twice.
    pub fn validate_tool_calls(&self) -> Result<(), TetherError> {
        let mut seen = std::collections::HashSet::with_capacity(self.tool_calls.len());
        for call in &self.tool_calls {
            if call.id.trim().is_empty() || call.name.trim().is_empty() {
                return Err(TetherError::MalformedResponse(
                    "tool call without id or name".into(),
                ));
            }
            if !seen.insert(call.id.as_str()) {
                return Err(TetherError::MalformedResponse(format!(
                    "tool call id '{}' used twice",
                    call.id
                )));
            }
        }
        Ok(())
    }

    /// Replay this response as the deltas a streaming provider would send.
    pub fn into_deltas(self) -> Vec<ResponseDelta> {
        let mut deltas = Vec::with_capacity(self.tool_calls.len() * 2 + 3);
        if !self.text.is_empty() {
            deltas.push(ResponseDelta::Text { text: self.text });
        }
        for call in self.tool_calls {
            deltas.push(ResponseDelta::ToolCallStart {
                id: call.id.clone(),
                name: call.name,
            });
            deltas.push(ResponseDelta::ToolCallArguments {
                id: call.id,
                fragment: call.arguments.to_string(),
            });
        }
        deltas.push(ResponseDelta::Usage { usage: self.usage });
        deltas.push(ResponseDelta::Done);
        deltas
    }
}

/// Core trait implemented by model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "anthropic").
    fn provider_name(&self) -> &str;
    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Generate a complete response.
    async fn generate_text(&self, request: &ProviderRequest)
        -> Result<ProviderResponse, TetherError>;

    /// Generate a response incrementally.
    ///
    /// The default replays [`ModelProvider::generate_text`] as a single burst.
    async fn stream_text(&self, request: &ProviderRequest) -> Result<DeltaStream, TetherError> {
        let response = self.generate_text(request).await?;
        Ok(stream::iter(response.into_deltas().into_iter().map(Ok)).boxed())
    }
}
