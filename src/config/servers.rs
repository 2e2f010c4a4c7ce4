//! Tool server launch descriptors.
//!
//! Two file formats are accepted, picked by extension:
//!
//! ```json
//! { "mcpServers": { "math": { "command": "python", "args": ["math.py"], "env": { "KEY": "${MATH_KEY}" } } } }
//! ```
//!
//! ```toml
//! [servers.search]
//! url = "http://localhost:8931/mcp"
//! ```
//!
//! Servers are returned sorted by id, which is also their registration order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TetherError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CALL_ATTEMPTS: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_SERVERS_FILE: &str = "servers.json";

static ENV_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference regex must compile")
});

/// Whether a connection may carry several invocations at once.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvocationPolicy {
    /// Invocations run in parallel over the transport.
    Concurrent,
    /// One invocation at a time; later calls queue behind earlier ones.
    Serialized,
}

/// How to reach a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerTransport {
    /// Spawn a child process and speak over its stdin/stdout.
    Stdio {
        command: String,
        args: Vec<String>,
        /// Added to the inherited process environment.
        env: BTreeMap<String, String>,
    },
    /// Streamable HTTP endpoint.
    Http { url: String },
}

impl ServerTransport {
    fn default_policy(&self) -> InvocationPolicy {
        match self {
            Self::Stdio { .. } => InvocationPolicy::Serialized,
            Self::Http { .. } => InvocationPolicy::Concurrent,
        }
    }
}

/// One configured tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLaunchDescriptor {
    pub id: String,
    pub transport: ServerTransport,
    /// Bound on connect and tool discovery.
    pub timeout: Duration,
    pub invocation_policy: InvocationPolicy,
    /// Attempts per tool call when the transport reports a transient failure.
    pub call_attempts: u32,
    pub retry_delay: Duration,
}

impl ServerLaunchDescriptor {
    pub fn stdio(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(
            id,
            ServerTransport::Stdio {
                command: command.into(),
                args,
                env: BTreeMap::new(),
            },
        )
    }

    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(id, ServerTransport::Http { url: url.into() })
    }

    pub fn with_transport(id: impl Into<String>, transport: ServerTransport) -> Self {
        let invocation_policy = transport.default_policy();
        Self {
            id: id.into(),
            transport,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            invocation_policy,
            call_attempts: DEFAULT_CALL_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_invocation_policy(mut self, policy: InvocationPolicy) -> Self {
        self.invocation_policy = policy;
        self
    }

    /// `attempts` of 1 disables tool-call retries.
    pub fn with_call_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.call_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(alias = "mcpServers", default)]
    servers: BTreeMap<String, ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    url: Option<String>,
    timeout_ms: Option<u64>,
    invocation_policy: Option<InvocationPolicy>,
    call_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
}

/// Default location: `servers.json` in the platform config directory.
pub fn default_servers_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "tether")
        .map(|dirs| dirs.config_dir().join(DEFAULT_SERVERS_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVERS_FILE))
}

/// Load descriptors from a JSON or TOML file.
pub fn load_servers(path: &Path) -> Result<Vec<ServerLaunchDescriptor>, TetherError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        TetherError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        parse_servers_toml(&raw)
    } else {
        parse_servers_json(&raw)
    }
}

pub fn parse_servers_json(raw: &str) -> Result<Vec<ServerLaunchDescriptor>, TetherError> {
    let file: ServersFile = serde_json::from_str(raw)
        .map_err(|e| TetherError::Configuration(format!("invalid servers file: {e}")))?;
    into_descriptors(file)
}

pub fn parse_servers_toml(raw: &str) -> Result<Vec<ServerLaunchDescriptor>, TetherError> {
    let file: ServersFile = toml::from_str(raw)
        .map_err(|e| TetherError::Configuration(format!("invalid servers file: {e}")))?;
    into_descriptors(file)
}

fn into_descriptors(file: ServersFile) -> Result<Vec<ServerLaunchDescriptor>, TetherError> {
    let mut seen = std::collections::HashSet::new();
    let mut descriptors = Vec::with_capacity(file.servers.len());

    for (raw_id, entry) in file.servers {
        let id = raw_id.trim().to_string();
        if id.is_empty() {
            return Err(TetherError::Configuration(
                "server id must not be empty".into(),
            ));
        }
        if !seen.insert(id.clone()) {
            return Err(TetherError::Configuration(format!(
                "duplicate server id '{id}'"
            )));
        }

        let transport = match (entry.command, entry.url) {
            (Some(command), None) => ServerTransport::Stdio {
                command,
                args: entry.args,
                env: expand_env(&id, entry.env),
            },
            (None, Some(url)) => ServerTransport::Http { url },
            (Some(_), Some(_)) => {
                return Err(TetherError::Configuration(format!(
                    "server '{id}' sets both command and url"
                )))
            }
            (None, None) => {
                return Err(TetherError::Configuration(format!(
                    "server '{id}' needs a command or a url"
                )))
            }
        };

        let mut descriptor = ServerLaunchDescriptor::with_transport(id, transport);
        if let Some(ms) = entry.timeout_ms.filter(|ms| *ms > 0) {
            descriptor.timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = entry.invocation_policy {
            descriptor.invocation_policy = policy;
        }
        if let Some(attempts) = entry.call_attempts {
            descriptor.call_attempts = attempts.max(1);
        }
        if let Some(ms) = entry.retry_delay_ms {
            descriptor.retry_delay = Duration::from_millis(ms);
        }
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}

/// Expand `${VAR}` references; entries naming an unset variable are dropped.
fn expand_env(server_id: &str, env: BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.into_iter()
        .filter_map(|(key, value)| match expand_value(&value) {
            Ok(expanded) => Some((key, expanded)),
            Err(missing) => {
                tracing::warn!(
                    server_id,
                    key = %key,
                    variable = %missing,
                    "Environment variable not set; dropping server env entry"
                );
                None
            }
        })
        .collect()
}

fn expand_value(value: &str) -> Result<String, String> {
    let mut missing = None;
    let expanded = ENV_REF_RE.replace_all(value, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(resolved) => resolved,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(name),
        None => Ok(expanded.into_owned()),
    }
}
