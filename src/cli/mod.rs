//! Command-line definitions for the `tether` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect and exercise configured MCP tool servers.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about = "tether — MCP tool-server orchestration")]
pub struct Cli {
    /// Server configuration file (JSON `mcpServers` or TOML `[servers.*]`)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Per-call tool timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to every server and report its status
    Servers,
    /// List the merged tool schema
    Tools(ToolsArgs),
    /// Call one tool through the registry
    Call(CallArgs),
}

#[derive(Parser, Debug)]
pub struct ToolsArgs {
    /// Print the schema as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Tool name
    pub tool: String,

    /// Arguments as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub args: String,
}
