//! Lifecycle of one tool-server connection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::Mutex;

use crate::config::{InvocationPolicy, ServerLaunchDescriptor};
use crate::error::TetherError;
use crate::tools::{ToolArguments, ToolDefinition};
use crate::util::retry::RetryPolicy;
use crate::util::timeout::with_timeout;

use super::transport::{ToolServerSession, ToolServerTransport};

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionStatus {
    /// Configured, never connected.
    Created,
    Connected,
    /// Closed or failed. Only [`ServerConnection::reconnect`] leaves this state.
    Disconnected,
}

enum ConnectionState {
    Created,
    Connected {
        session: Arc<dyn ToolServerSession>,
    },
    Disconnected {
        reason: String,
    },
}

/// One tool server: connect, discover, invoke, disconnect.
///
/// A connection that failed or was closed is never reused implicitly;
/// [`reconnect`](Self::reconnect) is the only way back and bumps
/// [`generation`](Self::generation).
pub struct ServerConnection {
    id: String,
    transport: Arc<dyn ToolServerTransport>,
    policy: InvocationPolicy,
    connect_timeout: Duration,
    call_retry: RetryPolicy,
    state: RwLock<ConnectionState>,
    tools: RwLock<Vec<ToolDefinition>>,
    lifecycle: Mutex<()>,
    invoke_gate: Mutex<()>,
    generation: AtomicU64,
}

impl ServerConnection {
    pub fn new(descriptor: &ServerLaunchDescriptor, transport: Arc<dyn ToolServerTransport>) -> Self {
        Self {
            id: descriptor.id.clone(),
            transport,
            policy: descriptor.invocation_policy,
            connect_timeout: descriptor.timeout,
            call_retry: RetryPolicy::fixed(descriptor.call_attempts, descriptor.retry_delay),
            state: RwLock::new(ConnectionState::Created),
            tools: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(()),
            invoke_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Build a connection backed by the MCP transport the descriptor names.
    #[cfg(feature = "mcp")]
    pub fn from_descriptor(descriptor: &ServerLaunchDescriptor) -> Self {
        Self::new(descriptor, crate::mcp::transport_for(descriptor))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn invocation_policy(&self) -> InvocationPolicy {
        self.policy
    }

    /// Incremented on every reconnect.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        match &*self.read_state() {
            ConnectionState::Created => ConnectionStatus::Created,
            ConnectionState::Connected { .. } => ConnectionStatus::Connected,
            ConnectionState::Disconnected { .. } => ConnectionStatus::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Why the connection is down, if it is.
    pub fn last_error(&self) -> Option<String> {
        match &*self.read_state() {
            ConnectionState::Disconnected { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    /// Establish the transport and discover tools.
    ///
    /// Calling this on a live connection returns the cached tools. Calling it
    /// on a disconnected one fails; use [`reconnect`](Self::reconnect).
    pub async fn connect(&self) -> Result<Vec<ToolDefinition>, TetherError> {
        let _lifecycle = self.lifecycle.lock().await;
        match &*self.read_state() {
            ConnectionState::Connected { .. } => return Ok(self.list_tools()),
            ConnectionState::Disconnected { reason } => {
                return Err(TetherError::connection(
                    &self.id,
                    format!("connection is closed ({reason}); reconnect explicitly"),
                ))
            }
            ConnectionState::Created => {}
        }
        self.establish().await
    }

    /// Tools found by the last successful discovery; never re-queries.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Invoke a tool, waiting at most `timeout` once the call is under way.
    ///
    /// On a `Serialized` connection the clock starts after earlier calls have
    /// released the connection, so a queued call waits at most the sum of
    /// the timeouts ahead of it. Transport failures are retried per the
    /// descriptor's `call_attempts` while the session is still open, within
    /// the same `timeout`; one that persists marks the connection
    /// disconnected.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: ToolArguments,
        timeout: Duration,
    ) -> Result<serde_json::Value, TetherError> {
        let _gate = match self.policy {
            InvocationPolicy::Serialized => Some(self.invoke_gate.lock().await),
            InvocationPolicy::Concurrent => None,
        };
        let (session, generation) = self.live_session().await?;
        let operation = format!("tool '{tool_name}' on server '{}'", self.id);

        let transient = |error: &TetherError| {
            let retry = matches!(error, TetherError::Connection { .. }) && !session.is_closed();
            if retry {
                tracing::warn!(server_id = %self.id, tool = tool_name, error = %error, "Transient tool call failure");
            }
            retry
        };
        let call = self.call_retry.execute_when(transient, || {
            let session = Arc::clone(&session);
            let arguments = arguments.clone();
            async move { session.call_tool(tool_name, arguments).await }
        });

        let result = with_timeout(&operation, timeout, call).await;
        if let Err(TetherError::Connection { message, .. }) = &result {
            self.mark_failed(generation, message.clone()).await;
        }
        result
    }

    /// Release the transport. Idempotent, and safe after a transport failure.
    pub async fn disconnect(&self) -> Result<(), TetherError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.close_current("disconnected").await
    }

    /// Tear down whatever is left and connect again from scratch.
    pub async fn reconnect(&self) -> Result<Vec<ToolDefinition>, TetherError> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Err(error) = self.close_current("reconnecting").await {
            tracing::warn!(server_id = %self.id, error = %error, "Error closing previous session");
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(server_id = %self.id, generation, "Reconnecting tool server");
        *self.write_state() = ConnectionState::Created;
        self.establish().await
    }

    async fn establish(&self) -> Result<Vec<ToolDefinition>, TetherError> {
        let handshake = async {
            let session = self.transport.open().await?;
            match session.list_tools().await {
                Ok(discovered) => Ok((session, discovered)),
                Err(error) => {
                    if let Err(close_error) = session.close().await {
                        tracing::debug!(server_id = %self.id, error = %close_error, "Close after failed discovery");
                    }
                    Err(error)
                }
            }
        };
        let operation = format!("connect to server '{}'", self.id);

        match with_timeout(&operation, self.connect_timeout, handshake).await {
            Ok((session, discovered)) => {
                let mut seen = HashSet::with_capacity(discovered.len());
                let mut tools = Vec::with_capacity(discovered.len());
                for tool in discovered {
                    if !seen.insert(tool.name.clone()) {
                        tracing::warn!(server_id = %self.id, tool = %tool.name, "Server listed a tool twice; keeping the first");
                        continue;
                    }
                    tools.push(ToolDefinition::from_discovered(&self.id, tool));
                }
                *self
                    .tools
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = tools.clone();
                *self.write_state() = ConnectionState::Connected { session };
                tracing::info!(server_id = %self.id, tools = tools.len(), "Connected to tool server");
                Ok(tools)
            }
            Err(error) => {
                let error = match error {
                    TetherError::Connection { .. } => error,
                    other => TetherError::connection(&self.id, other.to_string()),
                };
                *self.write_state() = ConnectionState::Disconnected {
                    reason: error.to_string(),
                };
                tracing::warn!(server_id = %self.id, error = %error, "Failed to connect to tool server");
                Err(error)
            }
        }
    }

    async fn live_session(&self) -> Result<(Arc<dyn ToolServerSession>, u64), TetherError> {
        let generation = self.generation();
        let session = match &*self.read_state() {
            ConnectionState::Connected { session } => Arc::clone(session),
            ConnectionState::Created => {
                return Err(TetherError::connection(&self.id, "server is not connected"))
            }
            ConnectionState::Disconnected { reason } => {
                return Err(TetherError::connection(
                    &self.id,
                    format!("server is disconnected ({reason})"),
                ))
            }
        };
        if session.is_closed() {
            let reason = "transport closed by peer".to_string();
            self.mark_failed(generation, reason.clone()).await;
            return Err(TetherError::connection(&self.id, reason));
        }
        Ok((session, generation))
    }

    async fn mark_failed(&self, generation: u64, reason: String) {
        if self.generation() != generation {
            return;
        }
        let previous = {
            let mut state = self.write_state();
            if !matches!(*state, ConnectionState::Connected { .. }) {
                return;
            }
            std::mem::replace(&mut *state, ConnectionState::Disconnected { reason })
        };
        tracing::warn!(server_id = %self.id, "Tool server transport failed; connection marked disconnected");
        if let ConnectionState::Connected { session } = previous {
            if let Err(error) = session.close().await {
                tracing::debug!(server_id = %self.id, error = %error, "Close after transport failure");
            }
        }
    }

    async fn close_current(&self, reason: &str) -> Result<(), TetherError> {
        let previous = std::mem::replace(
            &mut *self.write_state(),
            ConnectionState::Disconnected {
                reason: reason.to_string(),
            },
        );
        match previous {
            ConnectionState::Connected { session } => {
                tracing::info!(server_id = %self.id, "Disconnecting tool server");
                session.close().await
            }
            ConnectionState::Disconnected { reason: earlier } => {
                *self.write_state() = ConnectionState::Disconnected { reason: earlier };
                Ok(())
            }
            ConnectionState::Created => Ok(()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConnectionState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConnectionState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("policy", &self.policy)
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::DiscoveredTool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct FakeServer {
        opens: AtomicUsize,
        closes: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_open: AtomicBool,
        hang_open: AtomicBool,
        flaky_calls: AtomicUsize,
    }

    struct FakeSession {
        server: Arc<FakeServer>,
    }

    struct FakeTransport(Arc<FakeServer>);

    #[async_trait]
    impl ToolServerTransport for FakeTransport {
        async fn open(&self) -> Result<Arc<dyn ToolServerSession>, TetherError> {
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            if self.0.hang_open.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.0.fail_open.load(Ordering::SeqCst) {
                return Err(TetherError::connection("fake", "spawn failed"));
            }
            Ok(Arc::new(FakeSession {
                server: Arc::clone(&self.0),
            }))
        }
    }

    #[async_trait]
    impl ToolServerSession for FakeSession {
        async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TetherError> {
            Ok(vec![
                DiscoveredTool::new("echo", "Echo input", json!({ "type": "object" })),
                DiscoveredTool::new("echo", "Duplicate", json!({ "type": "object" })),
                DiscoveredTool::new("drop", "Kills the transport", json!({ "type": "object" })),
            ])
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: ToolArguments,
        ) -> Result<serde_json::Value, TetherError> {
            let now = self.server.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.server.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.server.in_flight.fetch_sub(1, Ordering::SeqCst);
            match name {
                "drop" => Err(TetherError::connection("fake", "broken pipe")),
                "flaky" if self.server.flaky_calls.fetch_add(1, Ordering::SeqCst) == 0 => {
                    Err(TetherError::connection("fake", "write failed"))
                }
                _ => Ok(arguments.to_value()),
            }
        }

        async fn close(&self) -> Result<(), TetherError> {
            self.server.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn connection(policy: InvocationPolicy) -> (ServerConnection, Arc<FakeServer>) {
        let server = Arc::new(FakeServer::default());
        let descriptor = ServerLaunchDescriptor::stdio("fake", "fake-server", vec![])
            .with_invocation_policy(policy)
            .with_timeout(Duration::from_secs(1))
            .with_call_retry(2, Duration::from_millis(50));
        (
            ServerConnection::new(&descriptor, Arc::new(FakeTransport(Arc::clone(&server)))),
            server,
        )
    }

    #[tokio::test]
    async fn invoke_before_connect_fails() {
        let (conn, _) = connection(InvocationPolicy::Serialized);
        let err = conn
            .invoke("echo", ToolArguments::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Connection { .. }));
    }

    #[tokio::test]
    async fn connect_discovers_and_caches_tools() {
        let (conn, server) = connection(InvocationPolicy::Serialized);

        let tools = conn.connect().await.unwrap();
        let again = conn.connect().await.unwrap();

        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "drop"]);
        assert_eq!(tools, again);
        assert_eq!(tools[0].server_id, "fake");
        assert_eq!(server.opens.load(Ordering::SeqCst), 1);
        assert_eq!(conn.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn failed_connect_is_a_connection_error() {
        let (conn, server) = connection(InvocationPolicy::Serialized);
        server.fail_open.store(true, Ordering::SeqCst);

        let err = conn.connect().await.unwrap_err();

        assert!(matches!(err, TetherError::Connection { .. }));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(conn.last_error().unwrap().contains("spawn failed"));
        assert!(conn.connect().await.is_err());
        assert_eq!(server.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_is_a_connection_error() {
        let (conn, server) = connection(InvocationPolicy::Serialized);
        server.hang_open.store(true, Ordering::SeqCst);

        let err = conn.connect().await.unwrap_err();

        assert!(matches!(err, TetherError::Connection { .. }));
        assert!(err.to_string().contains("Timeout"));
    }

    #[tokio::test]
    async fn serialized_policy_runs_one_call_at_a_time() {
        let (conn, server) = connection(InvocationPolicy::Serialized);
        conn.connect().await.unwrap();

        let calls = (0..3).map(|_| {
            conn.invoke("echo", ToolArguments::default(), Duration::from_secs(5))
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(server.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_policy_overlaps_calls() {
        let (conn, server) = connection(InvocationPolicy::Concurrent);
        conn.connect().await.unwrap();

        let calls = (0..3).map(|_| {
            conn.invoke("echo", ToolArguments::default(), Duration::from_secs(5))
        });
        futures::future::join_all(calls).await;

        assert_eq!(server.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn transport_failure_disconnects_until_reconnect() {
        let (conn, server) = connection(InvocationPolicy::Serialized);
        conn.connect().await.unwrap();

        let err = conn
            .invoke("drop", ToolArguments::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TetherError::Connection { .. }));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(server.closes.load(Ordering::SeqCst), 1);

        let err = conn
            .invoke("echo", ToolArguments::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disconnected"));

        conn.reconnect().await.unwrap();
        assert_eq!(conn.generation(), 1);
        assert_eq!(server.opens.load(Ordering::SeqCst), 2);
        let value = conn
            .invoke(
                "echo",
                ToolArguments::from_value("echo", json!({ "x": 1 })).unwrap(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(value, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (conn, server) = connection(InvocationPolicy::Serialized);
        conn.connect().await.unwrap();

        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();

        assert_eq!(server.closes.load(Ordering::SeqCst), 1);
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(conn.list_tools().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_transport_failure_is_retried() {
        let (conn, server) = connection(InvocationPolicy::Serialized);
        conn.connect().await.unwrap();

        let value = conn
            .invoke(
                "flaky",
                ToolArguments::from_value("flaky", json!({ "q": "x" })).unwrap(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(value, json!({ "q": "x" }));
        assert_eq!(server.flaky_calls.load(Ordering::SeqCst), 2);
        assert_eq!(conn.status(), ConnectionStatus::Connected);
        assert_eq!(server.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stay_within_the_call_timeout() {
        let server = Arc::new(FakeServer::default());
        let descriptor = ServerLaunchDescriptor::stdio("fake", "fake-server", vec![])
            .with_call_retry(5, Duration::from_secs(10));
        let conn = ServerConnection::new(&descriptor, Arc::new(FakeTransport(Arc::clone(&server))));
        conn.connect().await.unwrap();

        let err = conn
            .invoke("drop", ToolArguments::default(), Duration::from_secs(3))
            .await
            .unwrap_err();

        assert!(matches!(err, TetherError::Timeout { .. }));
    }
}
