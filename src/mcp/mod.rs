//! Model Context Protocol (MCP) client stack
//!
//! Key components:
//! - Protocol core with JSON-RPC 2.0 message handling
//! - WebSocket transport with request/response correlation
//! - Per-server client with capability handshake and retries
//! - Manager fanning context updates out to many servers

pub mod capabilities;
pub mod client;
pub mod context;
pub mod errors;
pub mod manager;
pub mod protocol;
pub mod retry;
pub mod server_config;
pub mod transport;

pub use capabilities::{Capability, ResourcesDescriptor, ServerCapabilities};
pub use client::{ClientStatus, ConnectionTestResult, MCPClient};
pub use context::{
    ContextItem, ContextItemKind, ConversationMessage, MessageRole, ProvideResourcesResult,
    ServerResourceUpdate,
};
pub use errors::{ErrorCategory, MCPError, MCPResult};
pub use manager::{select_active_servers, ContextUpdateResult, MCPManager, ServerError};
pub use protocol::{ClientInfo, MCPMessage, MessageId, ServerInfo, PROTOCOL_VERSION};
pub use retry::{RetryFailure, RetryPolicy};
pub use server_config::ServerConfig;
pub use transport::{
    ConnectionStatus, MCPTransport, TransportConfig, TransportFactory, TransportStats,
    WebSocketTransport, WebSocketTransportFactory,
};
