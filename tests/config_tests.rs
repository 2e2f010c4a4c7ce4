//! Loading server descriptors and loop settings.

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use tether::config::{load_servers, InvocationPolicy, LoopConfig, ServerTransport};
use tether::error::TetherError;

fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_json_servers_sorted_by_id() {
    let file = write_temp(
        ".json",
        r#"{
            "mcpServers": {
                "weather": { "url": "http://localhost:9000/mcp" },
                "calculator": { "command": "python", "args": ["calc.py"], "timeout_ms": 1500 }
            }
        }"#,
    );

    let servers = load_servers(file.path()).unwrap();

    let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["calculator", "weather"]);
    assert_eq!(servers[0].timeout, Duration::from_millis(1500));
    assert_eq!(servers[0].invocation_policy, InvocationPolicy::Serialized);
    assert!(matches!(
        &servers[1].transport,
        ServerTransport::Http { url } if url == "http://localhost:9000/mcp"
    ));
    assert_eq!(servers[1].invocation_policy, InvocationPolicy::Concurrent);
}

#[test]
fn loads_toml_servers_by_extension() {
    let file = write_temp(
        ".toml",
        r#"
            [servers.files]
            command = "files-server"
            args = ["--root", "/tmp"]
            invocation_policy = "concurrent"
        "#,
    );

    let servers = load_servers(file.path()).unwrap();

    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].id, "files");
    assert_eq!(servers[0].invocation_policy, InvocationPolicy::Concurrent);
    assert!(matches!(
        &servers[0].transport,
        ServerTransport::Stdio { command, args, .. }
            if command == "files-server" && args == &["--root".to_string(), "/tmp".to_string()]
    ));
}

#[test]
fn missing_file_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = load_servers(&dir.path().join("absent.json")).unwrap_err();

    assert!(matches!(err, TetherError::Configuration(message) if message.contains("cannot read")));
}

#[test]
fn malformed_file_is_a_configuration_error() {
    let file = write_temp(".json", "{ not json");

    let err = load_servers(file.path()).unwrap_err();

    assert!(matches!(err, TetherError::Configuration(message) if message.contains("invalid servers file")));
}

#[test]
fn loop_config_overrides_ignore_invalid_values() {
    let config = LoopConfig::default().with_overrides(|key| match key {
        "TETHER_MAX_ITERATIONS" => Some("4".into()),
        "TETHER_TOOL_TIMEOUT_MS" => Some("not-a-number".into()),
        "TETHER_MAX_TURNS" => Some("0".into()),
        "TETHER_STREAMING" => Some("off".into()),
        _ => None,
    });

    assert_eq!(config.max_iterations, 4);
    assert_eq!(config.tool_timeout, Duration::from_secs(30));
    assert_eq!(config.truncation.max_turns, Some(20));
    assert!(!config.streaming);
}
