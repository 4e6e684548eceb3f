//! Manager fan-out tests over a scripted in-memory transport

use async_trait::async_trait;
use mcp_context::mcp::{
    ClientInfo, ClientStatus, ContextItem, ErrorCategory, MCPClient, MCPError, MCPManager,
    MCPResult, MCPTransport, ServerConfig,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

/// How one scripted server behaves
#[derive(Clone)]
struct Script {
    fail_connect: bool,
    capabilities: Value,
    provide_result: Value,
    initialize_delay: Option<Duration>,
    /// Leading `mcp/provideResources` calls that never answer in time
    stalled_provides: u32,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_connect: false,
            capabilities: json!({"resources": true}),
            provide_result: json!({"ok": true}),
            initialize_delay: None,
            stalled_provides: 0,
        }
    }
}

struct ScriptedTransport {
    script: Script,
    connected: AtomicBool,
    connects: AtomicU32,
    disconnects: AtomicU32,
    provides: AtomicU32,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    fn new(script: Script) -> Self {
        Self {
            script,
            connected: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
            provides: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl MCPTransport for ScriptedTransport {
    async fn connect(&self) -> MCPResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_connect {
            return Err(MCPError::connection("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> MCPResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Value) -> MCPResult<Value> {
        // Reconnects on demand, as the WebSocket transport does
        if !self.is_connected() {
            self.connect().await?;
        }
        self.calls.lock().push((method.to_string(), params));
        match method {
            "initialize" => {
                if let Some(delay) = self.script.initialize_delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(json!({"capabilities": self.script.capabilities}))
            }
            "mcp/provideResources" => {
                if self.provides.fetch_add(1, Ordering::SeqCst) < self.script.stalled_provides {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok(self.script.provide_result.clone())
            }
            other => Err(MCPError::request(format!("unexpected method {}", other))),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

type Registry = Arc<Mutex<HashMap<i64, Arc<ScriptedTransport>>>>;

fn manager(configs: Vec<ServerConfig>, scripts: HashMap<i64, Script>) -> (MCPManager, Registry) {
    let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
    let created = registry.clone();

    let factory = move |server: &ServerConfig| -> MCPResult<Arc<dyn MCPTransport>> {
        let script = scripts.get(&server.id).cloned().unwrap_or_default();
        let transport = Arc::new(ScriptedTransport::new(script));
        created.lock().insert(server.id, transport.clone());
        let transport: Arc<dyn MCPTransport> = transport;
        Ok(transport)
    };

    let manager = MCPManager::with_factory(configs, ClientInfo::default(), Arc::new(factory));
    (manager, registry)
}

fn server(id: i64, priority: i32) -> ServerConfig {
    ServerConfig::new(id, format!("server-{}", id), format!("ws://scripted/{}", id))
        .with_priority(priority)
        .with_max_retries(1)
        .with_retry_backoff_ms(1)
        .with_timeout_ms(1_000)
}

fn transport(registry: &Registry, id: i64) -> Arc<ScriptedTransport> {
    registry.lock().get(&id).cloned().unwrap()
}

fn items() -> Vec<ContextItem> {
    vec![
        ContextItem::user_input("where is my order?"),
        ContextItem::agent_context("agent-9", "Concierge", Some("friendly".to_string()), None),
    ]
}

#[tokio::test]
async fn test_one_failing_server_does_not_affect_the_others() {
    let scripts = HashMap::from([
        (
            1,
            Script {
                fail_connect: true,
                ..Script::default()
            },
        ),
        (
            2,
            Script {
                provide_result: json!({"resources": [{"type": "document", "id": "b1", "content": {}}]}),
                ..Script::default()
            },
        ),
    ]);
    let (manager, registry) = manager(vec![server(1, 0), server(2, 1)], scripts);

    let result = manager.process_context(&items()).await;

    assert_eq!(result.resources.len(), 1);
    assert_eq!(result.resources[0].id, "b1");
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].server_id, 1);
    assert_eq!(result.errors[0].error.kind(), ErrorCategory::Connection);
    assert_eq!(result.errors[0].error.attempts(), Some(2));

    let failing = transport(&registry, 1);
    assert_eq!(failing.connects.load(Ordering::SeqCst), 2);
    assert_eq!(failing.disconnects.load(Ordering::SeqCst), 2);
    assert!(failing.calls_to("initialize").is_empty());
}

#[tokio::test]
async fn test_supported_types_filter_what_each_server_receives() {
    let scripts = HashMap::from([(
        1,
        Script {
            capabilities: json!({"resources": {"supportedTypes": ["agentContext"]}}),
            ..Script::default()
        },
    )]);
    let (manager, registry) = manager(vec![server(1, 0), server(2, 0)], scripts);

    let result = manager.process_context(&items()).await;
    assert!(result.is_complete());

    let restricted = transport(&registry, 1).calls_to("mcp/provideResources");
    assert_eq!(restricted.len(), 1);
    let sent = restricted[0]["resources"].as_array().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["type"], "agentContext");

    let unrestricted = transport(&registry, 2).calls_to("mcp/provideResources");
    assert_eq!(unrestricted[0]["resources"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_server_without_resources_gets_no_context_requests() {
    let scripts = HashMap::from([(
        1,
        Script {
            capabilities: json!({"tools": true, "prompts": {"listChanged": true}}),
            ..Script::default()
        },
    )]);
    let (manager, registry) = manager(vec![server(1, 0)], scripts);

    let result = manager.process_context(&items()).await;

    assert!(result.is_complete());
    assert!(result.resources.is_empty());
    let transport = transport(&registry, 1);
    assert_eq!(transport.calls_to("initialize").len(), 1);
    assert!(transport.calls_to("mcp/provideResources").is_empty());
}

#[tokio::test]
async fn test_inactive_servers_never_get_a_transport() {
    let (manager, registry) = manager(
        vec![server(1, 0), server(2, 0).inactive()],
        HashMap::new(),
    );

    manager.process_context(&items()).await;

    assert!(registry.lock().contains_key(&1));
    assert!(!registry.lock().contains_key(&2));
    assert_eq!(manager.client_count(), 1);
    assert!(manager.client(2).is_none());
}

#[tokio::test]
async fn test_resources_merge_in_priority_order() {
    let scripts = HashMap::from([
        (
            10,
            Script {
                provide_result: json!({"resources": [{"type": "note", "id": "late"}]}),
                ..Script::default()
            },
        ),
        (
            20,
            Script {
                provide_result: json!({"resources": [{"type": "note", "id": "early"}]}),
                ..Script::default()
            },
        ),
    ]);
    let (manager, _registry) = manager(vec![server(10, 5), server(20, 1)], scripts);

    let result = manager.process_context(&items()).await;

    let ids: Vec<&str> = result.resources.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["early", "late"]);
}

#[tokio::test]
async fn test_connected_clients_are_reused() {
    let (manager, registry) = manager(vec![server(1, 0)], HashMap::new());

    manager.process_context(&items()).await;
    manager.process_context(&items()).await;

    let transport = transport(&registry, 1);
    assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls_to("initialize").len(), 1);
    assert_eq!(transport.calls_to("mcp/provideResources").len(), 2);
}

#[tokio::test]
async fn test_disconnect_all_reaches_every_client() {
    let (manager, registry) = manager(
        vec![server(1, 0), server(2, 1), server(3, 2)],
        HashMap::new(),
    );

    manager.process_context(&items()).await;
    manager.disconnect_all().await;

    for id in [1, 2, 3] {
        let transport = transport(&registry, id);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert!(!transport.is_connected());
        assert!(!manager.client(id).unwrap().is_connected());
    }

    manager.disconnect_all().await;
    assert_eq!(transport(&registry, 2).disconnects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_disconnect_all_without_clients_is_a_no_op() {
    let (manager, registry) = manager(vec![server(1, 0)], HashMap::new());
    manager.disconnect_all().await;
    assert!(registry.lock().is_empty());
}

#[tokio::test]
async fn test_slow_handshake_times_out_and_is_reported() {
    let scripts = HashMap::from([(
        1,
        Script {
            initialize_delay: Some(Duration::from_millis(500)),
            ..Script::default()
        },
    )]);
    let slow = server(1, 0).with_timeout_ms(25).with_max_retries(0);
    let (manager, registry) = manager(vec![slow], scripts);

    let result = manager.process_context(&items()).await;

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error.kind(), ErrorCategory::Timeout);
    let transport = transport(&registry, 1);
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_probe_reports_each_server_and_disconnects() {
    let scripts = HashMap::from([(
        2,
        Script {
            fail_connect: true,
            ..Script::default()
        },
    )]);
    let (manager, registry) = manager(vec![server(1, 0), server(2, 1)], scripts);

    let results = manager.test_connections().await;

    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert!(results[0].capabilities.as_ref().unwrap().supports_resources());
    assert!(!results[1].success);
    assert!(results[1].error.is_some());
    assert!(!transport(&registry, 1).is_connected());
}

fn standalone_client(server: ServerConfig, script: Script) -> (MCPClient, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new(script));
    let client = MCPClient::with_transport(server, ClientInfo::default(), transport.clone());
    (client, transport)
}

#[tokio::test]
async fn test_closed_transport_is_not_reused_without_a_handshake() {
    let (client, transport) = standalone_client(server(1, 0), Script::default());
    client.connect().await.unwrap();
    assert!(client.server_capabilities().is_some());

    transport.connected.store(false, Ordering::SeqCst);
    let outcome = client.send_context(&items()).await.unwrap();

    assert!(outcome.is_none());
    assert!(client.server_capabilities().is_none());
    assert_eq!(client.status(), ClientStatus::Disconnected);
    assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    assert_eq!(transport.calls_to("initialize").len(), 1);
    assert!(transport.calls_to("mcp/provideResources").is_empty());
}

#[tokio::test]
async fn test_timed_out_send_reconnects_and_handshakes_before_retrying() {
    let script = Script {
        stalled_provides: 1,
        provide_result: json!({"resources": [{"type": "note", "id": "n1"}]}),
        ..Script::default()
    };
    let (client, transport) = standalone_client(server(1, 0).with_timeout_ms(50), script);
    client.connect().await.unwrap();

    let result = client.send_context(&items()).await.unwrap().unwrap();

    assert_eq!(result.resources[0].id, "n1");
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    assert_eq!(transport.calls_to("initialize").len(), 2);
    assert_eq!(transport.calls_to("mcp/provideResources").len(), 2);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_send_that_keeps_timing_out_leaves_the_client_disconnected() {
    let script = Script {
        stalled_provides: u32::MAX,
        ..Script::default()
    };
    let (client, transport) = standalone_client(server(1, 0).with_timeout_ms(30), script);
    client.connect().await.unwrap();

    let error = client.send_context(&items()).await.unwrap_err();

    assert_eq!(error.kind(), ErrorCategory::Request);
    assert_eq!(error.attempts(), Some(2));
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 2);
    assert!(!transport.is_connected());
    assert_eq!(client.status(), ClientStatus::Disconnected);
}

#[tokio::test]
async fn test_roster_reports_capabilities_from_the_latest_handshake() {
    let scripts = HashMap::from([(
        1,
        Script {
            capabilities: json!({"resources": {"supportedTypes": ["userInput"]}}),
            ..Script::default()
        },
    )]);
    let mut stale = server(1, 0);
    stale.capabilities = serde_json::from_value(json!({"tools": true})).ok();
    let (manager, _registry) = manager(vec![stale, server(2, 1)], scripts);

    let before = manager.active_servers();
    assert!(before[0].capabilities.as_ref().unwrap().has("tools"));
    assert!(before[1].capabilities.is_none());

    manager.process_context(&items()).await;

    let after = manager.active_servers();
    let refreshed = after[0].capabilities.as_ref().unwrap();
    assert!(!refreshed.has("tools"));
    assert_eq!(refreshed.supported_types(), Some(&["userInput".to_string()][..]));
    assert!(after[1].capabilities.as_ref().unwrap().supports_resources());
}
