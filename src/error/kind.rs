//! Error classification for routing recovery logic.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Machine-readable error kind surfaced in traces and session events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connection,
    ToolNotFound,
    ToolInvocation,
    Timeout,
    DuplicateTool,
    ProtocolViolation,
    ArgumentValidation,
    Llm,
    Io,
    Canceled,
    IterationLimit,
    SessionTerminated,
    InvalidState,
}

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Tool,
    Timeout,
    Configuration,
    Internal,
    Authentication,
    RateLimit,
    Network,
    Server,
    Api,
    Io,
    Canceled,
    Session,
}
