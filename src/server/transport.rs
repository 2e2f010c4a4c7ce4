//! The tool-server capability: how a connection reaches a server.
//!
//! Implementations exist for MCP over stdio and streamable HTTP (see
//! `crate::mcp`); tests plug in scripted doubles.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TetherError;
use crate::tools::{DiscoveredTool, ToolArguments};

/// Starts (or reaches) a server and performs the protocol handshake.
#[async_trait]
pub trait ToolServerTransport: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn ToolServerSession>, TetherError>;
}

/// A live protocol session with one server.
///
/// Whether `call_tool` may run concurrently on one session is decided by the
/// owning connection's [`InvocationPolicy`](crate::config::InvocationPolicy),
/// not assumed here.
#[async_trait]
pub trait ToolServerSession: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TetherError>;

    /// Invoke a tool. Server-reported failures are
    /// [`TetherError::ToolInvocation`]; a broken transport is
    /// [`TetherError::Connection`].
    async fn call_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<serde_json::Value, TetherError>;

    /// Release the transport. Must tolerate an already-failed transport.
    async fn close(&self) -> Result<(), TetherError>;

    fn is_closed(&self) -> bool {
        false
    }
}
