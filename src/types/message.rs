//! Conversation turn types exchanged with the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, TetherError};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Unique within one assistant turn.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of a single tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        output: serde_json::Value,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },
}

/// The result for one [`ToolCallRequest`], matched by call id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
}

impl ToolCallResult {
    pub fn success(call: &ToolCallRequest, output: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success { output },
        }
    }

    /// Convert a per-call error into model-visible failure data.
    pub fn failure(call: &ToolCallRequest, error: &TetherError) -> Self {
        let detail = match error {
            TetherError::ToolInvocation { payload, .. } => payload.clone(),
            _ => None,
        };
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Failure {
                kind: error.kind(),
                message: error.to_string(),
                detail,
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Failure { .. })
    }

    /// Render the outcome as the text shown to the model.
    pub fn output_text(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { output } => match output {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            },
            ToolOutcome::Failure {
                message, detail, ..
            } => match detail {
                Some(detail) => format!("Error: {message} ({detail})"),
                None => format!("Error: {message}"),
            },
        }
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ConversationTurn {
    User {
        text: String,
        timestamp: DateTime<Utc>,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
        timestamp: DateTime<Utc>,
    },
    ToolResults {
        results: Vec<ToolCallResult>,
        timestamp: DateTime<Utc>,
    },
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::Assistant {
            text: text.into(),
            tool_calls,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_results(results: Vec<ToolCallResult>) -> Self {
        Self::ToolResults {
            results,
            timestamp: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::ToolResults { .. } => Role::Tool,
        }
    }

    /// Text content of the turn, empty for tool results.
    pub fn text(&self) -> &str {
        match self {
            Self::User { text, .. } | Self::Assistant { text, .. } => text,
            Self::ToolResults { .. } => "",
        }
    }

    /// Tool calls requested by an assistant turn.
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}
