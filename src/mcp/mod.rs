//! Model Context Protocol transports backed by `rmcp`.

pub mod client;
pub mod transport;

pub use client::RmcpSession;
pub use transport::{transport_for, HttpTransport, StdioTransport};
