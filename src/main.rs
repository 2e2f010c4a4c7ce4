//! tether CLI binary entry point.

use std::time::Duration;

use clap::Parser;
use tether::cli::{CallArgs, Cli, Commands, ToolsArgs};
use tether::config::{default_servers_path, load_servers, LoopConfig};
use tether::error::TetherError;
use tether::server::ServerManager;
use tether::tools::ToolArguments;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), TetherError> {
    let path = cli.config.clone().unwrap_or_else(default_servers_path);
    let descriptors = load_servers(&path)?;
    let tool_timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| LoopConfig::from_env().tool_timeout);

    let manager = ServerManager::from_descriptors(&descriptors)?;
    let report = manager.bootstrap().await;
    for rejected in &report.rejected {
        eprintln!("warning: {rejected}");
    }

    let result = match cli.command {
        Commands::Servers => {
            for status in &report.servers {
                match &status.last_error {
                    Some(error) if !status.is_connected() => {
                        println!("{:<20} {:<12} {}", status.id, status.status.to_string(), error)
                    }
                    _ => println!(
                        "{:<20} {:<12} {} tools",
                        status.id, status.status.to_string(), status.tool_count
                    ),
                }
            }
            Ok(())
        }
        Commands::Tools(args) => print_tools(&manager, &args),
        Commands::Call(args) => call_tool(&manager, &args, tool_timeout).await,
    };

    manager.shutdown().await;
    result
}

fn print_tools(manager: &ServerManager, args: &ToolsArgs) -> Result<(), TetherError> {
    let registry = manager.registry();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&registry.schema())?);
        return Ok(());
    }
    for tool in registry.schema() {
        println!("{:<24} [{}] {}", tool.name, tool.server_id, tool.description);
    }
    eprintln!("schema fingerprint: {}", registry.schema_fingerprint()?);
    Ok(())
}

async fn call_tool(
    manager: &ServerManager,
    args: &CallArgs,
    timeout: Duration,
) -> Result<(), TetherError> {
    let registry = manager.registry();
    let tool = registry.resolve(&args.tool)?;
    let raw: serde_json::Value = serde_json::from_str(&args.args)?;
    let arguments = ToolArguments::parse(&tool.definition, raw)?;

    let output = tool.connection.invoke(&args.tool, arguments, timeout).await?;
    match output {
        serde_json::Value::String(text) => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}
