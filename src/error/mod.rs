//! Error types for tether.

pub mod kind;

pub use kind::{ErrorCategory, ErrorKind};

use thiserror::Error;

/// Primary error type for all tether operations.
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error ({server_id}): {message}")]
    Connection { server_id: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool invocation error ({tool_name}): {message}")]
    ToolInvocation {
        tool_name: String,
        message: String,
        payload: Option<serde_json::Value>,
    },

    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Duplicate tool '{tool_name}': already served by '{existing_server}', rejected from '{rejected_server}'")]
    DuplicateTool {
        tool_name: String,
        existing_server: String,
        rejected_server: String,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid arguments for {tool_name}: {message}")]
    ArgumentValidation { tool_name: String, message: String },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Canceled")]
    Canceled,

    #[error("Iteration limit reached: {max_iterations} model calls without a final answer")]
    IterationLimit { max_iterations: usize },

    #[error("Session terminated: {0}")]
    SessionTerminated(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl TetherError {
    /// Create a connection error for a server.
    pub fn connection(server_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            server_id: server_id.into(),
            message: message.into(),
        }
    }

    /// Create a tool invocation error without a server payload.
    pub fn invocation(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool_name: tool_name.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Create a timeout error for an operation.
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Machine-readable kind, used in traces and session events.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::ToolNotFound(_) => ErrorKind::ToolNotFound,
            Self::ToolInvocation { .. } => ErrorKind::ToolInvocation,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::DuplicateTool { .. } => ErrorKind::DuplicateTool,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::ArgumentValidation { .. } => ErrorKind::ArgumentValidation,
            Self::Authentication(_)
            | Self::RateLimited { .. }
            | Self::Api { .. }
            | Self::MalformedResponse(_)
            | Self::Network(_) => ErrorKind::Llm,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Io,
            Self::Canceled => ErrorKind::Canceled,
            Self::IterationLimit { .. } => ErrorKind::IterationLimit,
            Self::SessionTerminated(_) => ErrorKind::SessionTerminated,
            Self::InvalidState(_) => ErrorKind::InvalidState,
        }
    }

    /// Classify this error into a broad category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::ToolNotFound(_)
            | Self::ToolInvocation { .. }
            | Self::ArgumentValidation { .. } => ErrorCategory::Tool,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration(_) | Self::DuplicateTool { .. } => ErrorCategory::Configuration,
            Self::ProtocolViolation(_) | Self::InvalidState(_) => ErrorCategory::Internal,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Api { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::MalformedResponse(_) => ErrorCategory::Api,
            Self::Io(_) | Self::Serialization(_) => ErrorCategory::Io,
            Self::Canceled => ErrorCategory::Canceled,
            Self::IterationLimit { .. } | Self::SessionTerminated(_) => ErrorCategory::Session,
        }
    }

    /// Whether a model call failing with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server
        )
    }

    /// Whether this error belongs to a single tool call and is surfaced to the
    /// model as tool output instead of failing the session.
    pub fn is_per_call(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::ToolInvocation { .. }
                | Self::Timeout { .. }
                | Self::ArgumentValidation { .. }
                | Self::Connection { .. }
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TetherError>;
