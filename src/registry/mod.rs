//! One tool namespace over many server connections.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::error::TetherError;
use crate::server::ServerConnection;
use crate::tools::ToolDefinition;

/// A tool together with the connection that serves it.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub connection: Arc<ServerConnection>,
}

/// Maps tool names to their owning connection.
///
/// Tools keep the order in which their connections were registered, and are
/// sorted by name within one connection, so [`schema`](Self::schema) output is
/// byte-identical as long as the registered set is unchanged. A name already
/// taken by another connection is never shadowed: the later registration is
/// rejected as a whole with [`TetherError::DuplicateTool`].
#[derive(Debug, Default)]
pub struct ToolRegistry {
    server_ids: Vec<String>,
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from connections in order, skipping those that are
    /// not connected. Rejected registrations are returned alongside.
    pub fn build<I>(connections: I) -> (Self, Vec<TetherError>)
    where
        I: IntoIterator<Item = Arc<ServerConnection>>,
    {
        let mut registry = Self::new();
        let mut rejected = Vec::new();
        for connection in connections {
            if !connection.is_connected() {
                tracing::debug!(server_id = %connection.id(), "Skipping unconnected server");
                continue;
            }
            if let Err(error) = registry.register(connection) {
                tracing::warn!(error = %error, "Tool registration rejected");
                rejected.push(error);
            }
        }
        (registry, rejected)
    }

    /// Merge a connection's tools. Returns how many were added.
    pub fn register(&mut self, connection: Arc<ServerConnection>) -> Result<usize, TetherError> {
        let server_id = connection.id().to_string();
        if self.server_ids.contains(&server_id) {
            return Err(TetherError::InvalidState(format!(
                "server '{server_id}' is already registered"
            )));
        }

        let mut definitions = connection.list_tools();
        definitions.sort_by(|left, right| left.name.cmp(&right.name));

        for definition in &definitions {
            if let Some(existing) = self.index.get(&definition.name) {
                return Err(TetherError::DuplicateTool {
                    tool_name: definition.name.clone(),
                    existing_server: self.tools[*existing].definition.server_id.clone(),
                    rejected_server: server_id,
                });
            }
        }

        let added = definitions.len();
        for definition in definitions {
            self.index.insert(definition.name.clone(), self.tools.len());
            self.tools.push(RegisteredTool {
                definition,
                connection: Arc::clone(&connection),
            });
        }
        self.server_ids.push(server_id);
        Ok(added)
    }

    /// Find the connection serving `name`.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredTool, TetherError> {
        self.index
            .get(name)
            .map(|idx| &self.tools[*idx])
            .ok_or_else(|| TetherError::ToolNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All definitions, in registration order then by name.
    pub fn schema(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| tool.definition.clone())
            .collect()
    }

    pub fn schema_json(&self) -> Result<String, TetherError> {
        Ok(serde_json::to_string(&self.schema())?)
    }

    /// Hex SHA-256 of [`schema_json`](Self::schema_json), for cache keys.
    pub fn schema_fingerprint(&self) -> Result<String, TetherError> {
        let digest = Sha256::digest(self.schema_json()?.as_bytes());
        Ok(format!("{digest:x}"))
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|tool| tool.definition.name.as_str())
            .collect()
    }

    /// Registered server ids, in registration order.
    pub fn server_ids(&self) -> &[String] {
        &self.server_ids
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerLaunchDescriptor;
    use crate::server::{ToolServerSession, ToolServerTransport};
    use crate::tools::{DiscoveredTool, ToolArguments};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Listing(Vec<&'static str>);

    #[async_trait]
    impl ToolServerTransport for Listing {
        async fn open(&self) -> Result<Arc<dyn ToolServerSession>, TetherError> {
            Ok(Arc::new(Listing(self.0.clone())))
        }
    }

    #[async_trait]
    impl ToolServerSession for Listing {
        async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TetherError> {
            Ok(self
                .0
                .iter()
                .map(|name| DiscoveredTool::new(*name, format!("{name} tool"), json!({ "type": "object" })))
                .collect())
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: ToolArguments,
        ) -> Result<serde_json::Value, TetherError> {
            Ok(json!(null))
        }

        async fn close(&self) -> Result<(), TetherError> {
            Ok(())
        }
    }

    async fn connected(id: &str, tools: Vec<&'static str>) -> Arc<ServerConnection> {
        let descriptor = ServerLaunchDescriptor::stdio(id, "unused", vec![]);
        let connection = Arc::new(ServerConnection::new(&descriptor, Arc::new(Listing(tools))));
        connection.connect().await.unwrap();
        connection
    }

    #[tokio::test]
    async fn schema_orders_by_registration_then_name() {
        let mut registry = ToolRegistry::new();
        registry
            .register(connected("zeta", vec!["lookup", "fetch"]).await)
            .unwrap();
        registry
            .register(connected("alpha", vec!["sub", "add"]).await)
            .unwrap();

        assert_eq!(registry.tool_names(), vec!["fetch", "lookup", "add", "sub"]);
        assert_eq!(registry.schema_json().unwrap(), registry.schema_json().unwrap());
        assert_eq!(
            registry.schema_fingerprint().unwrap(),
            registry.schema_fingerprint().unwrap()
        );
        assert_eq!(registry.schema_fingerprint().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn duplicate_names_reject_later_connection() {
        let mut registry = ToolRegistry::new();
        registry
            .register(connected("first", vec!["lookup"]).await)
            .unwrap();

        let err = registry
            .register(connected("second", vec!["add", "lookup"]).await)
            .unwrap_err();

        match err {
            TetherError::DuplicateTool {
                tool_name,
                existing_server,
                rejected_server,
            } => {
                assert_eq!(tool_name, "lookup");
                assert_eq!(existing_server, "first");
                assert_eq!(rejected_server, "second");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.resolve("lookup").unwrap().connection.id(), "first");
        assert!(!registry.contains("add"));
        assert_eq!(registry.server_ids(), &["first".to_string()]);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(TetherError::ToolNotFound(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn build_skips_unconnected_servers() {
        let descriptor = ServerLaunchDescriptor::stdio("idle", "unused", vec![]);
        let idle = Arc::new(ServerConnection::new(&descriptor, Arc::new(Listing(vec!["x"]))));
        let live = connected("live", vec!["y"]).await;

        let (registry, rejected) = ToolRegistry::build(vec![idle, live]);

        assert!(rejected.is_empty());
        assert_eq!(registry.tool_names(), vec!["y"]);
    }
}
