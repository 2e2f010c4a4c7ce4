//! Tool definitions as served by tool servers and presented to the model.

use serde::{Deserialize, Serialize};

/// A tool as reported by a server during discovery, before it is bound to an owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema object describing the arguments.
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

impl DiscoveredTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool bound to the server that serves it. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub server_id: String,
}

impl ToolDefinition {
    pub fn from_discovered(server_id: impl Into<String>, tool: DiscoveredTool) -> Self {
        Self {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
            server_id: server_id.into(),
        }
    }

    /// Rough token footprint when presented to the model.
    pub fn estimated_tokens(&self) -> usize {
        let chars = self.name.len() + self.description.len() + self.input_schema.to_string().len();
        chars / 4
    }
}

pub(crate) fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
