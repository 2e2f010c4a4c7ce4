//! Streaming types.

use serde::{Deserialize, Serialize};

use super::usage::Usage;

/// An incremental fragment of a model response.
///
/// Tool calls arrive as a `ToolCallStart` carrying id and name, followed by
/// zero or more `ToolCallArguments` fragments whose concatenation is the JSON
/// argument object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseDelta {
    Text { text: String },
    ToolCallStart { id: String, name: String },
    ToolCallArguments { id: String, fragment: String },
    Usage { usage: Usage },
    Done,
}
