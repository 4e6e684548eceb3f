//! MCP Error Handling
//!
//! Error taxonomy shared by the transport, client and manager layers.
//! Every error is `Clone` so that a single shared connection attempt can hand
//! the same outcome to every caller waiting on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::protocol::RpcError;

/// Result type for MCP operations
pub type MCPResult<T> = Result<T, MCPError>;

/// MCP error enumeration
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum MCPError {
    /// The transport could not open (or lost) its physical connection
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The `initialize` exchange failed or returned malformed capabilities
    #[error("Handshake error: {message}")]
    Handshake { message: String },

    /// An attempt exceeded its allotted window
    #[error("Timeout error: operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The remote returned a JSON-RPC error envelope, or a request ran out of retries
    #[error("Request error: {message}{}", describe_remote(.code, .attempts))]
    Request {
        message: String,
        code: Option<i64>,
        data: Option<serde_json::Value>,
        attempts: Option<u32>,
    },

    /// Framing or channel failures inside the transport
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Invalid server or transport configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Last error of an operation that used up every attempt
    #[error("{last} (gave up after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<MCPError>,
    },
}

fn describe_remote(code: &Option<i64>, attempts: &Option<u32>) -> String {
    let mut suffix = String::new();
    if let Some(code) = code {
        suffix.push_str(&format!(" (code {})", code));
    }
    if let Some(attempts) = attempts {
        suffix.push_str(&format!(" after {} attempts", attempts));
    }
    suffix
}

impl MCPError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a handshake error
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create a request error that did not originate from a remote envelope
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
            code: None,
            data: None,
            attempts: None,
        }
    }

    /// Create a request error from a remote JSON-RPC error object
    pub fn remote(error: RpcError) -> Self {
        Self::Request {
            message: error.message,
            code: Some(error.code),
            data: error.data,
            attempts: None,
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap the last error of an operation that ran out of attempts
    pub fn exhausted(attempts: u32, last: MCPError) -> Self {
        Self::Exhausted {
            attempts,
            last: Box::new(last),
        }
    }

    /// Convert into a request error tagged with the number of attempts made.
    ///
    /// Remote error details (code, data) are preserved; any other kind is
    /// folded into the message.
    pub fn into_request_error(self, operation: &str, attempts: u32) -> Self {
        match self {
            MCPError::Request {
                message, code, data, ..
            } => MCPError::Request {
                message,
                code,
                data,
                attempts: Some(attempts),
            },
            MCPError::Exhausted { last, .. } => last.into_request_error(operation, attempts),
            other => MCPError::Request {
                message: format!("{} failed: {}", operation, other),
                code: None,
                data: None,
                attempts: Some(attempts),
            },
        }
    }

    /// Error category for logging and for callers deciding how to react
    pub fn kind(&self) -> ErrorCategory {
        match self {
            MCPError::Connection { .. } => ErrorCategory::Connection,
            MCPError::Handshake { .. } => ErrorCategory::Handshake,
            MCPError::Timeout { .. } => ErrorCategory::Timeout,
            MCPError::Request { .. } => ErrorCategory::Request,
            MCPError::Transport { .. } => ErrorCategory::Transport,
            MCPError::Serialization { .. } => ErrorCategory::Serialization,
            MCPError::Configuration { .. } => ErrorCategory::Configuration,
            MCPError::Exhausted { last, .. } => last.kind(),
        }
    }

    /// Number of attempts this error was tagged with, if any
    pub fn attempts(&self) -> Option<u32> {
        match self {
            MCPError::Exhausted { attempts, .. } => Some(*attempts),
            MCPError::Request { attempts, .. } => *attempts,
            _ => None,
        }
    }

    /// Remote JSON-RPC error code, if the failure came from an error envelope
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            MCPError::Request { code, .. } => *code,
            MCPError::Exhausted { last, .. } => last.remote_code(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MCPError {
    fn from(err: serde_json::Error) -> Self {
        MCPError::serialization(err.to_string())
    }
}

/// Error category for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Connection,
    Handshake,
    Timeout,
    Request,
    Transport,
    Serialization,
    Configuration,
}
