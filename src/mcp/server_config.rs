//! Per-server connection settings

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use url::Url;

use super::{
    capabilities::ServerCapabilities,
    errors::{MCPError, MCPResult},
    retry::RetryPolicy,
};

/// Default per-request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default linear backoff step in milliseconds
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_active() -> bool {
    true
}

/// One configured MCP server
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server identifier, unique per agent
    pub id: i64,
    /// Owning configuration record
    #[serde(default)]
    pub config_id: i64,
    /// Display name
    pub name: String,
    /// WebSocket endpoint
    pub endpoint_url: String,
    /// Reference to the secret holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_api_key_id: Option<String>,
    /// Environment variable the loader resolves the API key from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Resolved API key; never serialized
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff step in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Lower values are contacted first
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Capabilities from the last successful handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ServerCapabilities>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("id", &self.id)
            .field("config_id", &self.config_id)
            .field("name", &self.name)
            .field("endpoint_url", &self.endpoint_url)
            .field("vault_api_key_id", &self.vault_api_key_id)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("priority", &self.priority)
            .field("is_active", &self.is_active)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl ServerConfig {
    /// Active server with default timeouts and retry policy
    pub fn new(id: i64, name: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            id,
            config_id: 0,
            name: name.into(),
            endpoint_url: endpoint_url.into(),
            vault_api_key_id: None,
            api_key_env: None,
            api_key: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            priority: 0,
            is_active: true,
            capabilities: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff_ms(mut self, retry_backoff_ms: u64) -> Self {
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Retry policy for requests: each attempt bounded by `timeout_ms`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_backoff(), self.timeout())
    }

    /// Check the settings a connection cannot work without
    pub fn validate(&self) -> MCPResult<()> {
        if self.name.trim().is_empty() {
            return Err(MCPError::configuration(format!(
                "Server {} has an empty name",
                self.id
            )));
        }

        if self.timeout_ms == 0 {
            return Err(MCPError::configuration(format!(
                "Server '{}': timeout_ms must be greater than 0",
                self.name
            )));
        }

        let url = Url::parse(&self.endpoint_url).map_err(|e| {
            MCPError::configuration(format!(
                "Server '{}': invalid endpoint '{}': {}",
                self.name, self.endpoint_url, e
            ))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(MCPError::configuration(format!(
                "Server '{}': endpoint must use ws:// or wss://, got {}",
                self.name,
                url.scheme()
            )));
        }

        Ok(())
    }
}
