//! Configuration management module
//!
//! Settings come from a TOML file layered with environment overrides:
//! - `./mcp-context.toml`
//! - `<config dir>/mcp-context/config.toml`
//! - built-in defaults
//!
//! Environment variables prefixed `MCP_CONTEXT__` override file values, with
//! `__` separating nested keys (`MCP_CONTEXT__CLIENT__NAME`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, AppResult},
    mcp::{ClientInfo, ServerConfig},
};

/// File looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "mcp-context.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "MCP_CONTEXT";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Identity announced to servers
    pub client: ClientSettings,
    /// Configured MCP servers
    pub servers: Vec<ServerConfig>,
}

/// Client identity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let info = ClientInfo::default();
        Self {
            name: info.name,
            version: info.version,
        }
    }
}

impl ClientSettings {
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

impl Settings {
    /// Load configuration from default locations
    ///
    /// The first file that exists wins; a file that exists but fails to parse
    /// or validate is an error rather than silently skipped.
    pub async fn load() -> AppResult<Self> {
        info!("Loading application configuration");

        let local = PathBuf::from(".").join(CONFIG_FILE_NAME);
        if fs::try_exists(&local).await.unwrap_or(false) {
            return Self::load_from_file(&local).await;
        }

        if let Some(config_path) = Self::user_config_path() {
            if fs::try_exists(&config_path).await.unwrap_or(false) {
                return Self::load_from_file(&config_path).await;
            }
        }

        info!("Using default configuration");
        Self::from_sources(None)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path).await?;
        let settings = Self::from_sources(Some(&content))?;

        info!(
            "Loaded configuration from {} ({} server(s))",
            path.display(),
            settings.servers.len()
        );
        Ok(settings)
    }

    fn from_sources(toml_content: Option<&str>) -> AppResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(content) = toml_content {
            builder = builder.add_source(config::File::from_str(content, config::FileFormat::Toml));
        }

        let mut settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.resolve_api_keys();
        settings.validate()?;
        Ok(settings)
    }

    /// Resolve `api_key_env` references into API keys
    pub fn resolve_api_keys(&mut self) {
        for server in &mut self.servers {
            if server.api_key.is_some() {
                continue;
            }
            let Some(var) = server.api_key_env.as_deref() else {
                continue;
            };

            match std::env::var(var) {
                Ok(key) if !key.is_empty() => server.api_key = Some(key),
                _ => warn!(
                    "API key variable {} for MCP server '{}' is not set",
                    var, server.name
                ),
            }
        }
    }

    /// Save configuration to a file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let path = path.as_ref();
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        debug!("Validating configuration");

        if self.client.name.trim().is_empty() {
            return Err(AppError::application("client.name must not be empty"));
        }

        for server in &self.servers {
            server.validate()?;
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Get user configuration directory path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("mcp-context");
            path.push("config.toml");
            path
        })
    }
}
