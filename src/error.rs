//! Error handling for the mcp-context application layer
//!
//! Protocol failures live in [`crate::mcp::MCPError`]; this type wraps them
//! together with configuration and I/O failures for the binary and loaders.

use thiserror::Error;

use crate::mcp::MCPError;

/// Application result type alias
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Main application error enum
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration source errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// TOML serialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// MCP protocol errors
    #[error("MCP error: {0}")]
    Mcp(#[from] MCPError),

    /// Generic application errors
    #[error("Application error: {message}")]
    Application { message: String },
}

impl AppError {
    /// Create a new Application error
    pub fn application<S: Into<String>>(message: S) -> Self {
        Self::Application {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Mcp(error) => !matches!(
                error.kind(),
                crate::mcp::ErrorCategory::Configuration
            ),
            AppError::Application { .. } => true,
            AppError::Io(_) => false,
            AppError::Config(_) => false,
            AppError::Serde(_) => false,
            AppError::Toml(_) => false,
        }
    }
}
