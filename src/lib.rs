//! tether — agentic orchestration over MCP tool servers.
//!
//! Connects to any number of tool servers, merges their tools into one
//! registry, and drives a model conversation that calls those tools until
//! the model produces a final answer.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use tether::prelude::*;
//!
//! # async fn example(provider: Arc<dyn ModelProvider>) -> tether::error::Result<()> {
//! let descriptors = tether::config::load_servers(&tether::config::default_servers_path())?;
//! let manager = ServerManager::from_descriptors(&descriptors)?;
//! manager.bootstrap().await;
//!
//! let session = Session::new(provider, manager.registry(), LoopConfig::from_env());
//! let mut events = session.send_message("What is 2+2?");
//! while let Some(event) = events.next().await {
//!     if let SessionEvent::FinalText { text } = event {
//!         println!("{text}");
//!     }
//! }
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod conversation;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod registry;
pub mod server;
pub mod tools;
pub mod trace;
pub mod types;
pub mod util;

#[cfg(feature = "mcp")]
pub mod mcp;

#[cfg(feature = "cli")]
pub mod cli;
