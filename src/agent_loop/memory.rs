//! Persisting the running summary through memory tools on a tool server.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::registry::ToolRegistry;
use crate::tools::ToolArguments;

/// Which tools keep the conversation summary between sessions.
///
/// The store tool is called with `{"key", "value"}`, the retrieve tool with
/// `{"key"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBinding {
    pub store_tool: String,
    pub retrieve_tool: String,
    pub key: String,
}

impl Default for MemoryBinding {
    fn default() -> Self {
        Self {
            store_tool: "store".into(),
            retrieve_tool: "retrieve".into(),
            key: "conversation_summary".into(),
        }
    }
}

impl MemoryBinding {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Fetch the stored summary. Any failure yields `None`.
    pub async fn retrieve(&self, registry: &ToolRegistry, timeout: Duration) -> Option<String> {
        let tool = match registry.resolve(&self.retrieve_tool) {
            Ok(tool) => tool,
            Err(_) => {
                tracing::debug!(tool = %self.retrieve_tool, "No memory retrieve tool registered");
                return None;
            }
        };
        let arguments = match ToolArguments::parse(&tool.definition, json!({ "key": self.key })) {
            Ok(arguments) => arguments,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to retrieve from memory");
                return None;
            }
        };
        match tool
            .connection
            .invoke(&self.retrieve_tool, arguments, timeout)
            .await
        {
            Ok(serde_json::Value::Null) => None,
            Ok(serde_json::Value::String(text)) => Some(text).filter(|t| !t.trim().is_empty()),
            Ok(other) => Some(other.to_string()),
            Err(error) => {
                tracing::warn!(error = %error, "Failed to retrieve from memory");
                None
            }
        }
    }

    /// Store `summary`. Failures are logged and otherwise ignored.
    pub async fn store(&self, registry: &ToolRegistry, summary: &str, timeout: Duration) {
        let tool = match registry.resolve(&self.store_tool) {
            Ok(tool) => tool,
            Err(_) => {
                tracing::debug!(tool = %self.store_tool, "No memory store tool registered");
                return;
            }
        };
        let arguments = match ToolArguments::parse(
            &tool.definition,
            json!({ "key": self.key, "value": summary }),
        ) {
            Ok(arguments) => arguments,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to store in memory");
                return;
            }
        };
        match tool
            .connection
            .invoke(&self.store_tool, arguments, timeout)
            .await
        {
            Ok(_) => tracing::info!(key = %self.key, "Stored in memory"),
            Err(error) => tracing::warn!(error = %error, "Failed to store in memory"),
        }
    }
}
