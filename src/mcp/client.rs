//! An rmcp client session exposed as a [`ToolServerSession`].

use std::sync::Mutex;

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParams, CallToolResult, Content, ResourceContents},
    service::{ClientInitializeError, DynService, Peer, RoleClient, RunningService, ServiceError},
};

use crate::error::TetherError;
use crate::server::ToolServerSession;
use crate::tools::{DiscoveredTool, ToolArguments};

type DynClientService = Box<dyn DynService<RoleClient>>;
pub type McpRunningService = RunningService<RoleClient, DynClientService>;

/// A live MCP session.
///
/// Calls go through a cloned [`Peer`], so several may be in flight at once;
/// the running service itself is only touched on close.
pub struct RmcpSession {
    server_id: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<McpRunningService>>,
}

impl RmcpSession {
    pub fn new(server_id: impl Into<String>, service: McpRunningService) -> Self {
        let server_id = server_id.into();
        if let Some(info) = service.peer_info() {
            tracing::debug!(
                server_id = %server_id,
                server_name = %info.server_info.name,
                protocol_version = ?info.protocol_version,
                "MCP session initialized"
            );
        }
        Self {
            server_id,
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

#[async_trait]
impl ToolServerSession for RmcpSession {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TetherError> {
        let tools = match self.peer.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => self
                .peer
                .list_tools(None)
                .await
                .map(|page| page.tools)
                .map_err(|e| map_list_error(&self.server_id, e))?,
            Err(error) => return Err(map_list_error(&self.server_id, error)),
        };
        Ok(tools.into_iter().map(map_tool).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<serde_json::Value, TetherError> {
        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments: Some(arguments.into_map()),
                task: None,
            })
            .await
            .map_err(|e| map_service_error(&self.server_id, name, e))?;
        map_call_result(name, result)
    }

    async fn close(&self) -> Result<(), TetherError> {
        let service = self
            .service
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(service) = service else {
            return Ok(());
        };
        match service.cancel().await {
            Ok(reason) => {
                tracing::debug!(server_id = %self.server_id, reason = ?reason, "MCP session closed");
                Ok(())
            }
            Err(error) => Err(TetherError::connection(
                &self.server_id,
                format!("MCP service task failed during close: {error}"),
            )),
        }
    }

    fn is_closed(&self) -> bool {
        self.service
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(true, |service| service.is_closed())
    }
}

fn map_tool(tool: rmcp::model::Tool) -> DiscoveredTool {
    DiscoveredTool::new(
        tool.name.to_string(),
        tool.description
            .map(|d| d.to_string())
            .unwrap_or_default(),
        serde_json::Value::Object((*tool.input_schema).clone()),
    )
}

pub(crate) fn should_retry_protocol_fallback(error: &ClientInitializeError) -> bool {
    match error {
        ClientInitializeError::JsonRpcError(error) => {
            let message = error.message.to_ascii_lowercase();
            message.contains("protocol") && message.contains("version")
        }
        _ => false,
    }
}

/// Text items and text resources joined by newlines. Images are replaced by
/// a placeholder so the model knows something was returned.
fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
        } else if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        } else if item.as_image().is_some() {
            lines.push("[image content]".to_string());
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Structured content wins over text; raw content items are the last resort.
pub(crate) fn map_call_result(
    tool_name: &str,
    result: CallToolResult,
) -> Result<serde_json::Value, TetherError> {
    let text_content = extract_text_content(&result.content);
    let content = result
        .content
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect::<Vec<_>>();

    if result.is_error.unwrap_or(false) {
        let message = text_content
            .clone()
            .or_else(|| result.structured_content.as_ref().map(|v| v.to_string()))
            .unwrap_or_else(|| "tool returned an error result".into());
        return Err(TetherError::ToolInvocation {
            tool_name: tool_name.to_string(),
            message,
            payload: result
                .structured_content
                .or_else(|| (!content.is_empty()).then(|| serde_json::Value::Array(content))),
        });
    }

    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }
    if let Some(text) = text_content {
        return Ok(serde_json::Value::String(text));
    }
    Ok(serde_json::Value::Array(content))
}

pub(crate) fn map_client_initialize_error(
    server_id: &str,
    error: ClientInitializeError,
) -> TetherError {
    let message = match error {
        ClientInitializeError::ConnectionClosed(context) => {
            format!("connection closed during initialize: {context}")
        }
        ClientInitializeError::TransportError { error, context } => {
            format!("transport error during initialize ({context}): {error}")
        }
        ClientInitializeError::JsonRpcError(error) => format!(
            "initialize rejected with JSON-RPC error {}: {}",
            error.code.0, error.message
        ),
        ClientInitializeError::Cancelled => "initialize cancelled".to_string(),
        other => format!("initialize failed: {other}"),
    };
    TetherError::connection(server_id, message)
}

fn map_list_error(server_id: &str, error: ServiceError) -> TetherError {
    match error {
        ServiceError::Timeout { timeout } => {
            TetherError::timeout(format!("list tools on '{server_id}'"), timeout)
        }
        other => TetherError::connection(server_id, format!("tool discovery failed: {other}")),
    }
}

/// Transport-level failures mean the session is gone; everything else is a
/// failure of this one call.
pub(crate) fn map_service_error(
    server_id: &str,
    tool_name: &str,
    error: ServiceError,
) -> TetherError {
    match error {
        ServiceError::McpError(error) => TetherError::ToolInvocation {
            tool_name: tool_name.to_string(),
            message: format!("MCP error {}: {}", error.code.0, error.message),
            payload: error.data,
        },
        ServiceError::TransportSend(error) => {
            TetherError::connection(server_id, format!("transport send failed: {error}"))
        }
        ServiceError::TransportClosed => TetherError::connection(server_id, "transport closed"),
        ServiceError::UnexpectedResponse => {
            TetherError::invocation(tool_name, "unexpected MCP response")
        }
        ServiceError::Cancelled { reason } => {
            let suffix = reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default();
            TetherError::invocation(tool_name, format!("request cancelled{suffix}"))
        }
        ServiceError::Timeout { timeout } => TetherError::timeout(tool_name, timeout),
        other => TetherError::invocation(tool_name, format!("MCP service error: {other}")),
    }
}
