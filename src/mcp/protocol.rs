//! MCP Protocol Core
//!
//! JSON-RPC 2.0 envelopes and the `initialize` handshake payloads exchanged
//! with remote MCP servers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display};

use super::{
    capabilities::ServerCapabilities,
    errors::{MCPError, MCPResult},
};

/// JSON-RPC version carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision announced during `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used by this client
pub mod methods {
    /// Capability handshake
    pub const INITIALIZE: &str = "initialize";
    /// Context delivery
    pub const PROVIDE_RESOURCES: &str = "mcp/provideResources";
}

/// Message ID type for MCP messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(u64),
    String(String),
}

impl MessageId {
    /// Numeric correlation id, if this id is numeric
    pub fn as_number(&self) -> Option<u64> {
        match self {
            MessageId::Number(n) => Some(*n),
            MessageId::String(_) => None,
        }
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::String(s) => write!(f, "{}", s),
            MessageId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// JSON-RPC error object carried by an error envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPRequest {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: MessageId,
    /// Method name
    pub method: String,
    /// Request parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl MCPRequest {
    /// Create a request with a numeric correlation id
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: MessageId::Number(id),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// MCP response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPResponse {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Request ID; `None` when the server answered with `"id": null`
    pub id: Option<MessageId>,
    /// Response result (success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Response error (failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl MCPResponse {
    /// Split the envelope into its `result` or its remote error
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// MCP notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPNotification {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Notification parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// MCP message enumeration
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MCPMessage {
    Request(MCPRequest),
    Response(MCPResponse),
    Notification(MCPNotification),
}

impl MCPMessage {
    /// Parse and classify an inbound frame.
    ///
    /// A frame with a `method` is a request when it carries a non-null id and a
    /// notification otherwise; a frame with `result` or `error` is a response.
    pub fn from_json(json: &str) -> MCPResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| MCPError::serialization(format!("Failed to parse MCP message: {}", e)))?;

        let Value::Object(mut object) = value else {
            return Err(MCPError::serialization("MCP message must be a JSON object"));
        };

        let jsonrpc = match object.remove("jsonrpc") {
            Some(Value::String(version)) => version,
            _ => return Err(MCPError::serialization("Missing or invalid jsonrpc version")),
        };
        if jsonrpc != JSONRPC_VERSION {
            return Err(MCPError::serialization(format!(
                "Unsupported JSON-RPC version: {}",
                jsonrpc
            )));
        }

        let id = take_id(&mut object)?;
        let params = object.remove("params");

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err(MCPError::serialization("Method name must be a string"));
            };
            return Ok(match id {
                Some(id) => MCPMessage::Request(MCPRequest {
                    jsonrpc,
                    id,
                    method,
                    params,
                }),
                None => MCPMessage::Notification(MCPNotification {
                    jsonrpc,
                    method,
                    params,
                }),
            });
        }

        let result = object.remove("result");
        let error = match object.remove("error") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RpcError>(raw).map_err(|e| {
                MCPError::serialization(format!("Malformed error object: {}", e))
            })?),
        };

        if result.is_none() && error.is_none() {
            return Err(MCPError::serialization(
                "Message is neither a request, a notification nor a response",
            ));
        }

        Ok(MCPMessage::Response(MCPResponse {
            jsonrpc,
            id,
            result,
            error,
        }))
    }

    /// Serialize message to JSON string
    pub fn to_json(&self) -> MCPResult<String> {
        serde_json::to_string(self)
            .map_err(|e| MCPError::serialization(format!("Failed to serialize MCP message: {}", e)))
    }
}

fn take_id(object: &mut Map<String, Value>) -> MCPResult<Option<MessageId>> {
    match object.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| MCPError::serialization(format!("Invalid message id: {}", e))),
    }
}

/// Client information announced during `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// API key forwarded to servers that require one
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    pub api_key: String,
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// MCP initialization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version
    pub protocol_version: String,
    /// Client information
    pub client_info: ClientInfo,
    /// Client capabilities
    pub capabilities: Value,
    /// Credentials, only sent when the server is configured with an API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,
}

impl InitializeParams {
    pub fn new(client_info: ClientInfo, api_key: Option<String>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info,
            capabilities: Value::Object(Map::new()),
            authentication: api_key.map(|api_key| Authentication { api_key }),
        }
    }
}

/// Server information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    #[serde(default)]
    pub version: String,
}

/// MCP initialization result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version chosen by the server
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Server information
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
}
