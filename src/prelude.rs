//! Convenience re-exports for common use.

pub use crate::agent_loop::{AgentLoop, EventSink, LoopState, MemoryBinding, Session, SessionEvent};
pub use crate::config::{LoopConfig, ServerLaunchDescriptor};
pub use crate::conversation::{ConversationState, TruncationPolicy};
pub use crate::error::{ErrorKind, Result, TetherError};
pub use crate::provider::{ModelProvider, ProviderRequest, ProviderResponse};
pub use crate::registry::ToolRegistry;
pub use crate::server::{ServerConnection, ServerManager};
pub use crate::tools::{ToolArguments, ToolDefinition};
pub use crate::trace::{TraceEmitter, TraceEvent};
pub use crate::types::{ConversationTurn, ToolCallRequest, ToolCallResult, Usage};
