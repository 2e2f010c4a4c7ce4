//! Stdio and streamable-HTTP transports for MCP servers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{ClientInfo, ProtocolVersion};
use rmcp::service::{ClientInitializeError, ServiceExt};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;

use crate::config::{ServerLaunchDescriptor, ServerTransport};
use crate::error::TetherError;
use crate::server::{ToolServerSession, ToolServerTransport};

use super::client::{
    map_client_initialize_error, should_retry_protocol_fallback, McpRunningService, RmcpSession,
};

/// The MCP transport a descriptor names.
pub fn transport_for(descriptor: &ServerLaunchDescriptor) -> Arc<dyn ToolServerTransport> {
    match &descriptor.transport {
        ServerTransport::Stdio { command, args, env } => Arc::new(StdioTransport {
            server_id: descriptor.id.clone(),
            command: command.clone(),
            args: args.clone(),
            env: env.clone(),
        }),
        ServerTransport::Http { url } => Arc::new(HttpTransport {
            server_id: descriptor.id.clone(),
            url: url.clone(),
        }),
    }
}

fn client_info(protocol_version: ProtocolVersion) -> ClientInfo {
    ClientInfo {
        protocol_version,
        ..Default::default()
    }
}

/// A local server spawned as a child process speaking MCP on stdin/stdout.
/// The process is killed when the session is dropped.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    server_id: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl StdioTransport {
    pub fn new(server_id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            server_id: server_id.into(),
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    async fn serve(&self, info: ClientInfo) -> Result<McpRunningService, ClientInitializeError> {
        let mut command = Command::new(&self.command);
        command.args(&self.args).envs(&self.env).kill_on_drop(true);
        let transport = TokioChildProcess::new(command).map_err(|error| {
            ClientInitializeError::transport::<TokioChildProcess>(error, "spawn stdio transport")
        })?;
        info.into_dyn().serve(transport).await
    }
}

#[async_trait]
impl ToolServerTransport for StdioTransport {
    async fn open(&self) -> Result<Arc<dyn ToolServerSession>, TetherError> {
        tracing::debug!(server_id = %self.server_id, command = %self.command, "Spawning stdio MCP server");
        let service = match self.serve(client_info(ProtocolVersion::LATEST)).await {
            Ok(service) => service,
            Err(error) if should_retry_protocol_fallback(&error) => {
                tracing::debug!(server_id = %self.server_id, "Retrying initialize with legacy protocol version");
                self.serve(client_info(ProtocolVersion::V_2024_11_05))
                    .await
                    .map_err(|e| map_client_initialize_error(&self.server_id, e))?
            }
            Err(error) => return Err(map_client_initialize_error(&self.server_id, error)),
        };
        Ok(Arc::new(RmcpSession::new(&self.server_id, service)))
    }
}

/// A remote server reached over MCP streamable HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    server_id: String,
    url: String,
}

impl HttpTransport {
    pub fn new(server_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn serve(&self, info: ClientInfo) -> Result<McpRunningService, ClientInitializeError> {
        let transport = StreamableHttpClientTransport::from_uri(self.url.clone());
        info.into_dyn().serve(transport).await
    }
}

#[async_trait]
impl ToolServerTransport for HttpTransport {
    async fn open(&self) -> Result<Arc<dyn ToolServerSession>, TetherError> {
        tracing::debug!(server_id = %self.server_id, url = %self.url, "Connecting to HTTP MCP server");
        let service = match self.serve(client_info(ProtocolVersion::LATEST)).await {
            Ok(service) => service,
            Err(error) if should_retry_protocol_fallback(&error) => {
                tracing::debug!(server_id = %self.server_id, "Retrying initialize with legacy protocol version");
                self.serve(client_info(ProtocolVersion::V_2024_11_05))
                    .await
                    .map_err(|e| map_client_initialize_error(&self.server_id, e))?
            }
            Err(error) => return Err(map_client_initialize_error(&self.server_id, error)),
        };
        Ok(Arc::new(RmcpSession::new(&self.server_id, service)))
    }
}
