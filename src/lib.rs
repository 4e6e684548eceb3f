//! mcp-context - Model Context Protocol client stack
//!
//! Connects an agent to any number of MCP servers over WebSocket, negotiates
//! capabilities and fans context updates out to the servers that want them.
//!
//! # Architecture
//!
//! Three layers, leaves first:
//! - **Transport**: one WebSocket per server, JSON-RPC 2.0 id correlation
//! - **Client**: handshake, capability cache, retry and timeout policy
//! - **Manager**: server roster, fan-out and result aggregation

pub mod config;
pub mod error;
pub mod mcp;

pub use config::Settings;
pub use error::{AppError, AppResult};
pub use mcp::{ContextItem, ContextUpdateResult, MCPClient, MCPError, MCPManager, ServerConfig};

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system with structured logging
///
/// Log levels are configurable via the RUST_LOG environment variable.
pub fn initialize_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcp_context=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}
