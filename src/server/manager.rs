//! Bootstrap and cleanup of all configured servers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use serde::Serialize;

use crate::error::TetherError;
use crate::registry::ToolRegistry;

use super::connection::{ConnectionStatus, ServerConnection};

/// Per-server outcome, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub status: ConnectionStatus,
    pub tool_count: usize,
    pub last_error: Option<String>,
}

impl ServerStatus {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Result of [`ServerManager::bootstrap`].
#[derive(Debug)]
pub struct BootstrapReport {
    pub servers: Vec<ServerStatus>,
    /// Registrations refused because a tool name was already taken.
    pub rejected: Vec<TetherError>,
}

impl BootstrapReport {
    pub fn connected_count(&self) -> usize {
        self.servers.iter().filter(|s| s.is_connected()).count()
    }
}

/// Owns every configured [`ServerConnection`] and the registry built from them.
#[derive(Debug)]
pub struct ServerManager {
    connections: Vec<Arc<ServerConnection>>,
    registry: RwLock<Arc<ToolRegistry>>,
    shut_down: AtomicBool,
}

impl ServerManager {
    pub fn new(connections: Vec<Arc<ServerConnection>>) -> Result<Self, TetherError> {
        let mut seen = HashSet::with_capacity(connections.len());
        for connection in &connections {
            if connection.id().trim().is_empty() {
                return Err(TetherError::Configuration(
                    "server id must not be empty".into(),
                ));
            }
            if !seen.insert(connection.id().to_string()) {
                return Err(TetherError::Configuration(format!(
                    "duplicate server id '{}'",
                    connection.id()
                )));
            }
        }
        Ok(Self {
            connections,
            registry: RwLock::new(Arc::new(ToolRegistry::new())),
            shut_down: AtomicBool::new(false),
        })
    }

    /// One MCP-backed connection per descriptor.
    #[cfg(feature = "mcp")]
    pub fn from_descriptors(
        descriptors: &[crate::config::ServerLaunchDescriptor],
    ) -> Result<Self, TetherError> {
        Self::new(
            descriptors
                .iter()
                .map(|descriptor| Arc::new(ServerConnection::from_descriptor(descriptor)))
                .collect(),
        )
    }

    /// Connect every server concurrently and build the registry from those
    /// that came up. Failures are recorded, never propagated.
    pub async fn bootstrap(&self) -> BootstrapReport {
        let attempts = self.connections.iter().map(|connection| async move {
            if let Err(error) = connection.connect().await {
                tracing::warn!(server_id = %connection.id(), error = %error, "Server unavailable; its tools are omitted");
            }
        });
        join_all(attempts).await;

        let rejected = self.rebuild_registry();
        let servers = self.statuses();
        tracing::info!(
            connected = servers.iter().filter(|s| s.is_connected()).count(),
            configured = servers.len(),
            tools = self.registry().len(),
            "Tool servers bootstrapped"
        );
        BootstrapReport { servers, rejected }
    }

    /// The current registry. A reconnect swaps in a new one; holders of the
    /// old `Arc` keep a consistent view.
    pub fn registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(
            &self
                .registry
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn statuses(&self) -> Vec<ServerStatus> {
        self.connections
            .iter()
            .map(|connection| ServerStatus {
                id: connection.id().to_string(),
                status: connection.status(),
                tool_count: if connection.is_connected() {
                    connection.list_tools().len()
                } else {
                    0
                },
                last_error: connection.last_error(),
            })
            .collect()
    }

    pub fn connection(&self, id: &str) -> Option<Arc<ServerConnection>> {
        self.connections
            .iter()
            .find(|connection| connection.id() == id)
            .cloned()
    }

    pub fn connections(&self) -> &[Arc<ServerConnection>] {
        &self.connections
    }

    /// Reconnect one server and rebuild the registry.
    pub async fn reconnect(&self, id: &str) -> Result<Arc<ToolRegistry>, TetherError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TetherError::InvalidState(
                "server manager is shut down".into(),
            ));
        }
        let connection = self
            .connection(id)
            .ok_or_else(|| TetherError::Configuration(format!("unknown server '{id}'")))?;
        connection.reconnect().await?;
        let rejected = self.rebuild_registry();
        if let Some(error) = rejected.into_iter().next() {
            tracing::warn!(server_id = id, error = %error, "Reconnected server has colliding tools");
        }
        Ok(self.registry())
    }

    /// Disconnect everything. Individual failures are logged; calling this
    /// again is a no-op.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let closes = self.connections.iter().map(|connection| async move {
            if let Err(error) = connection.disconnect().await {
                tracing::warn!(server_id = %connection.id(), error = %error, "Error during server cleanup");
            }
        });
        join_all(closes).await;
        *self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(ToolRegistry::new());
        tracing::info!("Tool servers shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn rebuild_registry(&self) -> Vec<TetherError> {
        let (registry, rejected) = ToolRegistry::build(self.connections.iter().cloned());
        *self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(registry);
        rejected
    }
}
