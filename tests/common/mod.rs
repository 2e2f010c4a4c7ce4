//! Shared test doubles: a scripted model provider and in-process tool servers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use tether::agent_loop::SessionEvent;
use tether::config::{InvocationPolicy, ServerLaunchDescriptor};
use tether::error::TetherError;
use tether::provider::{DeltaStream, ModelProvider, ProviderRequest, ProviderResponse};
use tether::server::{ServerConnection, ServerManager, ToolServerSession, ToolServerTransport};
use tether::tools::{DiscoveredTool, ToolArguments};
use tether::types::{ResponseDelta, ToolCallRequest, Usage};

enum Step {
    Respond(ProviderResponse),
    Fail(TetherError),
}

/// A provider that answers from a queue, one entry per model call.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<(Duration, Step)>>,
    requests: Mutex<Vec<ProviderRequest>>,
    chunk_chars: Option<usize>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            chunk_chars: None,
        }
    }

    /// Stream text in pieces of `chars` characters instead of one delta.
    pub fn chunked(mut self, chars: usize) -> Self {
        self.chunk_chars = Some(chars.max(1));
        self
    }

    pub fn text(self, text: &str, usage: Usage) -> Self {
        self.push(Duration::ZERO, Step::Respond(ProviderResponse::final_text(text, usage)))
    }

    pub fn tool_calls(self, calls: Vec<ToolCallRequest>, usage: Usage) -> Self {
        self.push(
            Duration::ZERO,
            Step::Respond(ProviderResponse::with_tool_calls("", calls, usage)),
        )
    }

    pub fn delayed_text(self, delay: Duration, text: &str) -> Self {
        self.push(delay, Step::Respond(ProviderResponse::final_text(text, Usage::new(1, 1))))
    }

    pub fn fail(self, error: TetherError) -> Self {
        self.push(Duration::ZERO, Step::Fail(error))
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn push(self, delay: Duration, step: Step) -> Self {
        self.script.lock().unwrap().push_back((delay, step));
        self
    }

    async fn next(&self, request: &ProviderRequest) -> Result<ProviderResponse, TetherError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        let Some((delay, step)) = next else {
            return Err(TetherError::MalformedResponse("script exhausted".into()));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match step {
            Step::Respond(response) => Ok(response),
            Step::Fail(error) => Err(error),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-1"
    }

    async fn generate_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, TetherError> {
        self.next(request).await
    }

    async fn stream_text(&self, request: &ProviderRequest) -> Result<DeltaStream, TetherError> {
        let response = self.next(request).await?;
        let Some(size) = self.chunk_chars else {
            return Ok(stream::iter(response.into_deltas().into_iter().map(Ok)).boxed());
        };

        let chars: Vec<char> = response.text.chars().collect();
        let mut deltas: Vec<ResponseDelta> = chars
            .chunks(size)
            .map(|piece| ResponseDelta::Text {
                text: piece.iter().collect(),
            })
            .collect();
        deltas.extend(
            ProviderResponse {
                text: String::new(),
                ..response
            }
            .into_deltas(),
        );
        Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
    }
}

type Handler = Arc<dyn Fn(&ToolArguments) -> Result<Value, TetherError> + Send + Sync>;

/// One tool served by a [`ScriptedServer`].
#[derive(Clone)]
pub struct ScriptedTool {
    name: String,
    schema: Value,
    delay: Duration,
    handler: Handler,
}

impl ScriptedTool {
    pub fn new(
        name: &str,
        handler: impl Fn(&ToolArguments) -> Result<Value, TetherError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            schema: json!({ "type": "object" }),
            delay: Duration::ZERO,
            handler: Arc::new(handler),
        }
    }

    pub fn value(name: &str, value: Value) -> Self {
        Self::new(name, move |_| Ok(value.clone()))
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// An in-process tool server. Every completed call is logged with its
/// arguments.
#[derive(Clone)]
pub struct ScriptedServer {
    id: String,
    tools: Vec<ScriptedTool>,
    open_error: Option<String>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedServer {
    pub fn new(id: &str, tools: Vec<ScriptedTool>) -> Self {
        Self {
            id: id.to_string(),
            tools,
            open_error: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A server that cannot be started.
    pub fn unreachable(id: &str, reason: &str) -> Self {
        Self {
            open_error: Some(reason.to_string()),
            ..Self::new(id, Vec::new())
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn connection(&self, policy: InvocationPolicy) -> Arc<ServerConnection> {
        let descriptor = ServerLaunchDescriptor::stdio(self.id.as_str(), "scripted", vec![])
            .with_invocation_policy(policy);
        Arc::new(ServerConnection::new(&descriptor, Arc::new(self.clone())))
    }
}

#[async_trait]
impl ToolServerTransport for ScriptedServer {
    async fn open(&self) -> Result<Arc<dyn ToolServerSession>, TetherError> {
        if let Some(reason) = &self.open_error {
            return Err(TetherError::connection(&self.id, reason.clone()));
        }
        self.closed.store(false, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl ToolServerSession for ScriptedServer {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, TetherError> {
        Ok(self
            .tools
            .iter()
            .map(|tool| DiscoveredTool::new(&tool.name, format!("{} tool", tool.name), tool.schema.clone()))
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<Value, TetherError> {
        let tool = self
            .tools
            .iter()
            .find(|tool| tool.name == name)
            .ok_or_else(|| TetherError::invocation(name, "unknown tool"))?;
        if !tool.delay.is_zero() {
            tokio::time::sleep(tool.delay).await;
        }
        let result = (tool.handler)(&arguments);
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.to_value()));
        result
    }

    async fn close(&self) -> Result<(), TetherError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connect `servers` concurrently-invocable and bootstrap a manager.
pub async fn bootstrap(servers: &[ScriptedServer]) -> ServerManager {
    bootstrap_with(servers, InvocationPolicy::Concurrent).await
}

pub async fn bootstrap_with(servers: &[ScriptedServer], policy: InvocationPolicy) -> ServerManager {
    let manager = ServerManager::new(
        servers
            .iter()
            .map(|server| server.connection(policy))
            .collect(),
    )
    .unwrap();
    manager.bootstrap().await;
    manager
}

/// `add` and `lookup`, the two servers most tests share.
pub fn math_server() -> ScriptedServer {
    let add = ScriptedTool::new("add", |args| {
        Ok(json!(args.get_i64("a").unwrap_or(0) + args.get_i64("b").unwrap_or(0)))
    })
    .with_schema(json!({
        "type": "object",
        "properties": { "a": { "type": "number" }, "b": { "type": "number" } },
        "required": ["a", "b"]
    }));
    ScriptedServer::new("math", vec![add])
}

pub fn lookup_server() -> ScriptedServer {
    let lookup = ScriptedTool::new("lookup", |args| {
        Ok(json!(format!("data-{}", args.get_str("key").unwrap_or_default())))
    })
    .with_schema(json!({
        "type": "object",
        "properties": { "key": { "type": "string" } },
        "required": ["key"]
    }));
    ScriptedServer::new("kv", vec![lookup])
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

/// Everything currently buffered in an event channel.
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn partial_text(events: &[SessionEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::PartialText { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}
