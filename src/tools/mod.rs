//! Tool definitions and argument handling at the registry boundary.

pub mod arguments;
pub mod definition;
pub mod validation;

pub use arguments::ToolArguments;
pub use definition::{DiscoveredTool, ToolDefinition};
pub use validation::validate_arguments;
