//! MCP Client Implementation
//!
//! Protocol semantics for one configured server: the `initialize` handshake,
//! capability caching and context delivery, with retries and timeouts applied
//! on top of the raw transport.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use tracing::{debug, info, warn};

use super::{
    capabilities::ServerCapabilities,
    context::{ContextItem, ProvideResourcesResult},
    errors::{ErrorCategory, MCPError, MCPResult},
    protocol::{methods, ClientInfo, InitializeParams, InitializeResult, ServerInfo, PROTOCOL_VERSION},
    server_config::ServerConfig,
    transport::{MCPTransport, TransportConfig, WebSocketTransport},
};

/// Client status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientStatus {
    /// Client not connected
    Disconnected,
    /// Transport connection in progress
    Connecting,
    /// `initialize` in flight
    Handshaking,
    /// Client ready for requests
    Ready,
}

/// Outcome of [`MCPClient::test_connection`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub server_id: i64,
    pub server_name: String,
    pub success: bool,
    pub capabilities: Option<ServerCapabilities>,
    pub server_info: Option<ServerInfo>,
    pub error: Option<String>,
    /// Time spent connecting, including retries
    pub latency_ms: u64,
}

/// Client for one configured MCP server
pub struct MCPClient {
    server: ServerConfig,
    client_info: ClientInfo,
    transport: Arc<dyn MCPTransport>,
    status: RwLock<ClientStatus>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    server_info: RwLock<Option<ServerInfo>>,
}

impl MCPClient {
    /// Create a client talking WebSocket to `server.endpoint_url`
    pub fn new(server: ServerConfig, client_info: ClientInfo) -> MCPResult<Self> {
        server.validate()?;
        let transport = Arc::new(WebSocketTransport::new(TransportConfig::new(
            server.endpoint_url.clone(),
        )));
        Ok(Self::with_transport(server, client_info, transport))
    }

    /// Create a client over an existing transport
    pub fn with_transport(
        server: ServerConfig,
        client_info: ClientInfo,
        transport: Arc<dyn MCPTransport>,
    ) -> Self {
        Self {
            server,
            client_info,
            transport,
            status: RwLock::new(ClientStatus::Disconnected),
            capabilities: RwLock::new(None),
            server_info: RwLock::new(None),
        }
    }

    /// Connect and perform the capability handshake.
    ///
    /// Makes up to `max_retries + 1` attempts, each bounded by twice the
    /// server timeout. A failed attempt tears the transport down before the
    /// backoff, so no half-open connection survives it.
    pub async fn connect(&self) -> MCPResult<()> {
        info!(
            "Connecting to MCP server '{}' at {}",
            self.server.name, self.server.endpoint_url
        );

        let policy = self
            .server
            .retry_policy()
            .with_attempt_timeout(self.server.timeout().saturating_mul(2));

        let outcome = policy
            .run(
                methods::INITIALIZE,
                move |_| self.connect_once(),
                move |_: &MCPError| self.drop_connection(),
            )
            .await;

        match outcome {
            Ok(result) => {
                info!(
                    "MCP server '{}' ready ({})",
                    self.server.name,
                    result
                        .server_info
                        .as_ref()
                        .map(|info| format!("{} {}", info.name, info.version))
                        .unwrap_or_else(|| "unidentified server".to_string())
                );
                self.store_session(result);
                Ok(())
            }
            Err(failure) => {
                self.clear_session();
                warn!(
                    "Giving up on MCP server '{}' after {} attempts: {}",
                    self.server.name, failure.attempts, failure.last_error
                );
                Err(MCPError::exhausted(failure.attempts, failure.last_error))
            }
        }
    }

    async fn connect_once(&self) -> MCPResult<InitializeResult> {
        self.set_status(ClientStatus::Connecting);
        self.transport.connect().await?;

        self.set_status(ClientStatus::Handshaking);
        self.handshake().await
    }

    async fn handshake(&self) -> MCPResult<InitializeResult> {
        let params = serde_json::to_value(InitializeParams::new(
            self.client_info.clone(),
            self.server.api_key.clone(),
        ))?;

        let raw = self
            .transport
            .send_request(methods::INITIALIZE, params)
            .await
            .map_err(|e| match e {
                MCPError::Request { .. } => MCPError::handshake(format!("initialize rejected: {}", e)),
                other => other,
            })?;

        let result: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| MCPError::handshake(format!("Malformed initialize result: {}", e)))?;

        if let Some(version) = result.protocol_version.as_deref() {
            if version != PROTOCOL_VERSION {
                warn!(
                    "MCP server '{}' speaks protocol {} (client {})",
                    self.server.name, version, PROTOCOL_VERSION
                );
            }
        }

        Ok(result)
    }

    /// Send the items this server's capabilities make relevant.
    ///
    /// Returns `Ok(None)` without touching the network when nothing is
    /// relevant, including when the client is not `Ready`. A timed-out attempt
    /// tears the connection down, and the next attempt performs a fresh
    /// handshake before resending.
    pub async fn send_context(
        &self,
        items: &[ContextItem],
    ) -> MCPResult<Option<ProvideResourcesResult>> {
        if !self.is_connected() {
            debug!(
                "MCP client for '{}' is not ready, skipping context",
                self.server.name
            );
            return Ok(None);
        }

        let relevant = self
            .server_capabilities()
            .map(|caps| caps.relevant_items(items))
            .unwrap_or_default();

        if relevant.is_empty() {
            debug!(
                "No relevant context for MCP server '{}', skipping",
                self.server.name
            );
            return Ok(None);
        }

        debug!(
            "Sending {} context item(s) to MCP server '{}'",
            relevant.len(),
            self.server.name
        );
        let params = json!({ "resources": serde_json::to_value(&relevant)? });

        let raw = self
            .server
            .retry_policy()
            .run(
                methods::PROVIDE_RESOURCES,
                move |_| {
                    let params = params.clone();
                    async move {
                        let ready = *self.status.read() == ClientStatus::Ready;
                        if !ready || !self.transport.is_connected() {
                            self.resume_session().await?;
                        }
                        self.transport
                            .send_request(methods::PROVIDE_RESOURCES, params)
                            .await
                    }
                },
                move |error: &MCPError| {
                    let teardown = error.kind() == ErrorCategory::Timeout
                        || *self.status.read() != ClientStatus::Ready;
                    async move {
                        if teardown {
                            self.drop_connection().await;
                        }
                    }
                },
            )
            .await
            .map_err(|failure| {
                failure
                    .last_error
                    .into_request_error(methods::PROVIDE_RESOURCES, failure.attempts)
            })?;

        ProvideResourcesResult::from_value(raw).map(Some)
    }

    /// Tear down the transport and forget the session. Idempotent.
    pub async fn disconnect(&self) -> MCPResult<()> {
        let outcome = self.transport.disconnect().await;
        self.clear_session();
        debug!("MCP client for '{}' disconnected", self.server.name);
        outcome
    }

    /// Connect, report what the server advertised, then always disconnect
    pub async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let outcome = self.connect().await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = ConnectionTestResult {
            server_id: self.server.id,
            server_name: self.server.name.clone(),
            success: outcome.is_ok(),
            capabilities: self.server_capabilities(),
            server_info: self.server_info(),
            error: outcome.err().map(|e| e.to_string()),
            latency_ms,
        };

        if let Err(e) = self.disconnect().await {
            warn!(
                "Disconnect after connection test of '{}' failed: {}",
                self.server.name, e
            );
        }

        result
    }

    /// Current status, downgraded to `Disconnected` if the transport closed
    pub fn status(&self) -> ClientStatus {
        let status = *self.status.read();
        if status == ClientStatus::Ready && !self.transport.is_connected() {
            debug!("Transport for '{}' closed underneath the client", self.server.name);
            self.clear_session();
            return ClientStatus::Disconnected;
        }
        status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ClientStatus::Ready
    }

    /// Capabilities from the last successful handshake
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().clone()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Handshake again on a connection that was lost between attempts
    async fn resume_session(&self) -> MCPResult<()> {
        debug!(
            "Re-establishing session with MCP server '{}' before resending context",
            self.server.name
        );
        let result = self.connect_once().await?;
        self.store_session(result);
        Ok(())
    }

    async fn drop_connection(&self) {
        if let Err(e) = self.transport.disconnect().await {
            debug!("Transport cleanup for '{}' failed: {}", self.server.name, e);
        }
        self.set_status(ClientStatus::Disconnected);
    }

    fn store_session(&self, result: InitializeResult) {
        *self.capabilities.write() = Some(result.capabilities);
        *self.server_info.write() = result.server_info;
        self.set_status(ClientStatus::Ready);
    }

    fn set_status(&self, status: ClientStatus) {
        *self.status.write() = status;
    }

    fn clear_session(&self) {
        self.set_status(ClientStatus::Disconnected);
        *self.capabilities.write() = None;
        *self.server_info.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::{protocol::RpcError, transport::MockMCPTransport};
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::assert_ok;

    fn server() -> ServerConfig {
        ServerConfig::new(1, "docs", "ws://127.0.0.1:1/mcp")
            .with_max_retries(2)
            .with_retry_backoff_ms(1)
            .with_timeout_ms(1_000)
    }

    fn initialize_result(capabilities: Value) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {"name": "docs-server", "version": "1.2.0"},
            "capabilities": capabilities
        })
    }

    fn client(transport: MockMCPTransport) -> MCPClient {
        MCPClient::with_transport(server(), ClientInfo::default(), Arc::new(transport))
    }

    #[tokio::test]
    async fn test_connect_caches_capabilities() {
        let mut transport = MockMCPTransport::new();
        transport.expect_connect().times(1).returning(|| Ok(()));
        transport
            .expect_send_request()
            .withf(|method, _| method.to_string() == "initialize")
            .times(1)
            .returning(|_, _| {
                Ok(initialize_result(json!({"resources": {"supportedTypes": ["userInput"]}})))
            });
        transport.expect_is_connected().returning(|| true);

        let client = client(transport);
        assert_eq!(client.status(), ClientStatus::Disconnected);
        assert!(client.server_capabilities().is_none());

        assert_ok!(client.connect().await);

        assert_eq!(client.status(), ClientStatus::Ready);
        let caps = client.server_capabilities().unwrap();
        assert!(caps.supports_resources());
        assert_eq!(client.server_info().unwrap().name, "docs-server");
    }

    #[tokio::test]
    async fn test_persistent_failure_makes_every_attempt() {
        let mut transport = MockMCPTransport::new();
        transport
            .expect_connect()
            .times(3)
            .returning(|| Err(MCPError::connection("refused")));
        transport.expect_disconnect().times(3).returning(|| Ok(()));
        transport.expect_send_request().times(0);
        transport.expect_is_connected().returning(|| false);

        let client = client(transport);
        let error = client.connect().await.unwrap_err();

        assert_eq!(error.attempts(), Some(3));
        assert_eq!(error.kind(), ErrorCategory::Connection);
        assert_eq!(client.status(), ClientStatus::Disconnected);
        assert!(client.server_capabilities().is_none());
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut transport = MockMCPTransport::new();
        transport.expect_connect().times(2).returning(|| Ok(()));
        transport.expect_disconnect().times(1).returning(|| Ok(()));
        transport
            .expect_send_request()
            .withf(|method, _| method.to_string() == "initialize")
            .times(2)
            .returning(move |_, _| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(MCPError::remote(RpcError {
                        code: -32603,
                        message: "warming up".to_string(),
                        data: None,
                    }))
                } else {
                    Ok(initialize_result(json!({"resources": true})))
                }
            });
        transport.expect_is_connected().returning(|| true);

        let client = client(transport);
        assert_ok!(client.connect().await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_malformed_capabilities_fail_the_handshake() {
        let mut transport = MockMCPTransport::new();
        transport.expect_connect().times(1).returning(|| Ok(()));
        transport.expect_disconnect().times(1).returning(|| Ok(()));
        transport
            .expect_send_request()
            .times(1)
            .returning(|_, _| Ok(json!({"serverInfo": {"name": "x"}})));

        let client = MCPClient::with_transport(
            server().with_max_retries(0),
            ClientInfo::default(),
            Arc::new(transport),
        );
        let error = client.connect().await.unwrap_err();

        assert_eq!(error.kind(), ErrorCategory::Handshake);
        assert_eq!(error.attempts(), Some(1));
    }

    #[tokio::test]
    async fn test_api_key_is_forwarded_in_initialize() {
        let mut transport = MockMCPTransport::new();
        transport.expect_connect().returning(|| Ok(()));
        transport
            .expect_send_request()
            .withf(|method, params| {
                method.to_string() == "initialize"
                    && params["authentication"]["apiKey"] == "sk-test"
                    && params["protocolVersion"] == PROTOCOL_VERSION
            })
            .times(1)
            .returning(|_, _| Ok(initialize_result(json!({}))));

        let client = MCPClient::with_transport(
            server().with_api_key("sk-test"),
            ClientInfo::default(),
            Arc::new(transport),
        );
        assert_ok!(client.connect().await);
    }

    #[tokio::test]
    async fn test_send_context_skips_servers_without_resources() {
        let mut transport = MockMCPTransport::new();
        transport.expect_connect().returning(|| Ok(()));
        transport
            .expect_send_request()
            .withf(|method, _| method.to_string() == "initialize")
            .times(1)
            .returning(|_, _| Ok(initialize_result(json!({"tools": true}))));
        transport.expect_is_connected().returning(|| true);

        let client = client(transport);
        assert_ok!(client.connect().await);

        let outcome = client
            .send_context(&[ContextItem::user_input("hello")])
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_send_context_before_connect_is_a_no_op() {
        let mut transport = MockMCPTransport::new();
        transport.expect_send_request().times(0);

        let client = client(transport);
        let outcome = client
            .send_context(&[ContextItem::user_input("hello")])
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_send_context_returns_resources() {
        let mut transport = MockMCPTransport::new();
        transport.expect_connect().returning(|| Ok(()));
        transport
            .expect_send_request()
            .withf(|method, _| method.to_string() == "initialize")
            .returning(|_, _| {
                Ok(initialize_result(json!({"resources": {"supportedTypes": ["userInput"]}})))
            });
        transport
            .expect_send_request()
            .withf(|method, params| {
                method.to_string() == "mcp/provideResources"
                    && params["resources"].as_array().map(|r| r.len()) == Some(1)
                    && params["resources"][0]["type"] == "userInput"
            })
            .times(1)
            .returning(|_, _| {
                Ok(json!({"resources": [{"type": "document", "id": "d1", "content": {"title": "FAQ"}}]}))
            });
        transport.expect_is_connected().returning(|| true);

        let client = client(transport);
        assert_ok!(client.connect().await);

        let items = vec![
            ContextItem::user_input("hello"),
            ContextItem::agent_context("a1", "Helper", None, None),
        ];
        let result = client.send_context(&items).await.unwrap().unwrap();
        assert_eq!(result.resources.len(), 1);
        assert_eq!(result.resources[0].id, "d1");
    }

    #[tokio::test]
    async fn test_send_context_retries_then_reports_attempts() {
        let mut transport = MockMCPTransport::new();
        transport.expect_connect().returning(|| Ok(()));
        transport
            .expect_send_request()
            .withf(|method, _| method.to_string() == "initialize")
            .returning(|_, _| Ok(initialize_result(json!({"resources": true}))));
        transport
            .expect_send_request()
            .withf(|method, _| method.to_string() == "mcp/provideResources")
            .times(3)
            .returning(|_, _| {
                Err(MCPError::remote(RpcError {
                    code: -32000,
                    message: "index unavailable".to_string(),
                    data: None,
                }))
            });
        transport.expect_is_connected().returning(|| true);

        let client = client(transport);
        assert_ok!(client.connect().await);

        let error = client
            .send_context(&[ContextItem::user_input("hello")])
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorCategory::Request);
        assert_eq!(error.attempts(), Some(3));
        assert_eq!(error.remote_code(), Some(-32000));
    }

    #[tokio::test]
    async fn test_connection_probe_always_disconnects() {
        let mut transport = MockMCPTransport::new();
        transport.expect_connect().returning(|| Ok(()));
        transport
            .expect_send_request()
            .returning(|_, _| Ok(initialize_result(json!({"resources": true}))));
        transport.expect_disconnect().times(1).returning(|| Ok(()));

        let client = client(transport);
        let result = client.test_connection().await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.capabilities.unwrap().supports_resources());
        assert_eq!(result.server_info.unwrap().version, "1.2.0");
        assert!(client.server_capabilities().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut transport = MockMCPTransport::new();
        transport.expect_disconnect().times(2).returning(|| Ok(()));
        transport.expect_is_connected().returning(|| false);

        let client = client(transport);
        assert_ok!(client.disconnect().await);
        assert_ok!(client.disconnect().await);
        assert_eq!(client.status(), ClientStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_transport_close_downgrades_status() {
        let connected = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = connected.clone();

        let mut transport = MockMCPTransport::new();
        transport.expect_connect().returning(|| Ok(()));
        transport
            .expect_send_request()
            .returning(|_, _| Ok(initialize_result(json!({"resources": true}))));
        transport
            .expect_is_connected()
            .returning(move || flag.load(Ordering::SeqCst));

        let client = client(transport);
        assert_ok!(client.connect().await);
        assert!(client.is_connected());

        connected.store(false, Ordering::SeqCst);
        assert_eq!(client.status(), ClientStatus::Disconnected);
        assert!(client.server_capabilities().is_none());
    }

    #[tokio::test]
    async fn test_send_context_after_transport_close_sends_nothing() {
        let connected = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = connected.clone();

        let mut transport = MockMCPTransport::new();
        transport.expect_connect().times(1).returning(|| Ok(()));
        transport
            .expect_send_request()
            .withf(|method, _| method.to_string() == "initialize")
            .times(1)
            .returning(|_, _| Ok(initialize_result(json!({"resources": true}))));
        transport
            .expect_send_request()
            .withf(|method, _| method.to_string() == "mcp/provideResources")
            .times(0);
        transport
            .expect_is_connected()
            .returning(move || flag.load(Ordering::SeqCst));

        let client = client(transport);
        assert_ok!(client.connect().await);

        connected.store(false, Ordering::SeqCst);
        let outcome = client
            .send_context(&[ContextItem::user_input("hello")])
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert_eq!(client.status(), ClientStatus::Disconnected);
        assert!(client.server_capabilities().is_none());
    }

    #[test]
    fn test_new_rejects_invalid_server() {
        assert!(MCPClient::new(
            ServerConfig::new(1, "bad", "http://localhost:1"),
            ClientInfo::default()
        )
        .is_err());
        assert!(MCPClient::new(server(), ClientInfo::default()).is_ok());
    }
}
