//! Multi-server context fan-out
//!
//! The manager owns the configured servers of one agent, lazily creates one
//! client per active server and fans every context update out to the servers
//! whose capabilities make it relevant. A failing server never affects the
//! others; its error is reported next to the merged resources.

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, info, warn};

use super::{
    client::{ConnectionTestResult, MCPClient},
    context::{ContextItem, ProvideResourcesResult, ServerResourceUpdate},
    errors::{MCPError, MCPResult},
    protocol::ClientInfo,
    server_config::ServerConfig,
    transport::{TransportFactory, WebSocketTransportFactory},
};

/// Failure of one server during a fan-out
#[derive(Debug, Clone, Serialize)]
pub struct ServerError {
    pub server_id: i64,
    pub server_name: String,
    pub error: MCPError,
}

/// Aggregate outcome of [`MCPManager::process_context`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextUpdateResult {
    /// Resources from every server that answered, in priority order
    pub resources: Vec<ServerResourceUpdate>,
    /// One entry per server that failed
    pub errors: Vec<ServerError>,
}

impl ContextUpdateResult {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Keep active servers, ordered by ascending priority, first occurrence of
/// each id wins. Ties keep their configured order.
pub fn select_active_servers(configs: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut active: Vec<ServerConfig> = configs.into_iter().filter(|s| s.is_active).collect();
    active.sort_by_key(|s| s.priority);

    let mut seen = HashSet::new();
    active.retain(|server| {
        let fresh = seen.insert(server.id);
        if !fresh {
            warn!(
                "Ignoring duplicate MCP server id {} ('{}')",
                server.id, server.name
            );
        }
        fresh
    });
    active
}

/// Owner of every MCP client of one agent
pub struct MCPManager {
    servers: Vec<ServerConfig>,
    client_info: ClientInfo,
    factory: Arc<dyn TransportFactory>,
    clients: Mutex<HashMap<i64, Arc<MCPClient>>>,
}

impl MCPManager {
    /// Manager using WebSocket transports and the default client identity
    pub fn new(configs: Vec<ServerConfig>) -> Self {
        Self::with_factory(
            configs,
            ClientInfo::default(),
            Arc::new(WebSocketTransportFactory),
        )
    }

    pub fn with_factory(
        configs: Vec<ServerConfig>,
        client_info: ClientInfo,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let configured = configs.len();
        let servers = select_active_servers(configs);
        info!(
            "MCP manager initialized with {} active server(s) of {} configured",
            servers.len(),
            configured
        );

        Self {
            servers,
            client_info,
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Active servers in the order they are contacted.
    ///
    /// `capabilities` holds what each server advertised in its last handshake
    /// with this manager, or the configured cache if there has been none.
    pub fn active_servers(&self) -> Vec<ServerConfig> {
        let clients = self.clients.lock();
        self.servers
            .iter()
            .map(|server| {
                let mut server = server.clone();
                if let Some(capabilities) = clients
                    .get(&server.id)
                    .and_then(|client| client.server_capabilities())
                {
                    server.capabilities = Some(capabilities);
                }
                server
            })
            .collect()
    }

    /// Number of clients created so far
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn client(&self, server_id: i64) -> Option<Arc<MCPClient>> {
        self.clients.lock().get(&server_id).cloned()
    }

    fn client_for(&self, server: &ServerConfig) -> MCPResult<Arc<MCPClient>> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&server.id) {
            return Ok(client.clone());
        }

        server.validate()?;
        let transport = self.factory.create_transport(server)?;
        let client = Arc::new(MCPClient::with_transport(
            server.clone(),
            self.client_info.clone(),
            transport,
        ));
        clients.insert(server.id, client.clone());
        debug!("Created MCP client for server '{}'", server.name);
        Ok(client)
    }

    /// Fan `items` out to every active server.
    ///
    /// Servers are contacted concurrently; results are merged in priority
    /// order. Never fails: per-server failures land in `errors`.
    pub async fn process_context(&self, items: &[ContextItem]) -> ContextUpdateResult {
        let outcomes = join_all(
            self.servers
                .iter()
                .map(|server| self.process_server(server, items)),
        )
        .await;

        let mut result = ContextUpdateResult::default();
        for (server, outcome) in self.servers.iter().zip(outcomes) {
            match outcome {
                Ok(Some(update)) => result.resources.extend(update.resources),
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        "MCP server '{}' failed to process context: {}",
                        server.name, error
                    );
                    result.errors.push(ServerError {
                        server_id: server.id,
                        server_name: server.name.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            "Context update finished: {} resource(s), {} server error(s)",
            result.resources.len(),
            result.errors.len()
        );
        result
    }

    async fn process_server(
        &self,
        server: &ServerConfig,
        items: &[ContextItem],
    ) -> MCPResult<Option<ProvideResourcesResult>> {
        let client = self.client_for(server)?;
        if !client.is_connected() {
            client.connect().await?;
        }

        let relevant = client
            .server_capabilities()
            .map(|caps| caps.relevant_items(items))
            .unwrap_or_default();
        if relevant.is_empty() {
            debug!("Nothing relevant for MCP server '{}'", server.name);
            return Ok(None);
        }

        client.send_context(&relevant).await
    }

    /// Probe every active server; each probe ends disconnected
    pub async fn test_connections(&self) -> Vec<ConnectionTestResult> {
        join_all(self.servers.iter().map(|server| async move {
            match self.client_for(server) {
                Ok(client) => client.test_connection().await,
                Err(error) => ConnectionTestResult {
                    server_id: server.id,
                    server_name: server.name.clone(),
                    success: false,
                    capabilities: None,
                    server_info: None,
                    error: Some(error.to_string()),
                    latency_ms: 0,
                },
            }
        }))
        .await
    }

    /// Disconnect every client created so far. Idempotent.
    pub async fn disconnect_all(&self) {
        let clients: Vec<Arc<MCPClient>> = self.clients.lock().values().cloned().collect();
        let outcomes = join_all(clients.iter().map(|client| client.disconnect())).await;

        for (client, outcome) in clients.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!(
                    "Failed to disconnect from MCP server '{}': {}",
                    client.server().name,
                    e
                );
            }
        }
        info!("Disconnected {} MCP client(s)", clients.len());
    }
}
