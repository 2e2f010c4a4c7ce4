//! Tool-server connections and their lifecycle.

pub mod connection;
pub mod manager;
pub mod transport;

pub use connection::{ConnectionStatus, ServerConnection};
pub use manager::{BootstrapReport, ServerManager, ServerStatus};
pub use transport::{ToolServerSession, ToolServerTransport};
