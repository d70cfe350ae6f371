//! End-to-end tests for the gateway API
//!
//! Each test starts the real axum router on an ephemeral port, backed by the
//! in-memory registry and simulated routers, and drives it over HTTP and
//! WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use rosgw_api::{create_router, AppState};
use rosgw_conn::{
    ConnectionConfig, ConnectionManager, SimulatedDevice, SimulatedDialer, TelemetryMultiplexer,
};
use rosgw_core::{CreateDeviceRequest, DeviceId, DeviceRegistry, InMemoryRegistry};

// =============================================================================
// Test server
// =============================================================================

struct TestServer {
    addr: SocketAddr,
    http: reqwest::Client,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    async fn start(router: axum::Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            http: reqwest::Client::new(),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> (StatusCode, Value) {
        let response = request.send().await.unwrap();
        let status = response.status();
        let body = response.json::<Value>().await.unwrap();
        (status, body)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(self.http.get(self.url(path))).await
    }

    async fn post(&self, path: &str) -> (StatusCode, Value) {
        self.send(self.http.post(self.url(path))).await
    }

    async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.http.post(self.url(path)).json(&body)).await
    }

    async fn put_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.http.put(self.url(path)).json(&body)).await
    }

    async fn patch_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(self.http.patch(self.url(path)).json(&body)).await
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        self.send(self.http.delete(self.url(path))).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct Gateway {
    server: TestServer,
    registry: Arc<InMemoryRegistry>,
    dialer: Arc<SimulatedDialer>,
    manager: Arc<ConnectionManager>,
    multiplexer: Arc<TelemetryMultiplexer>,
    shutdown: CancellationToken,
}

impl Gateway {
    async fn start() -> Self {
        Self::start_with(Duration::from_secs(30)).await
    }

    async fn start_with(connect_timeout: Duration) -> Self {
        let registry = Arc::new(InMemoryRegistry::new());
        let dialer =
            Arc::new(SimulatedDialer::new().with_sample_interval(Duration::from_millis(20)));
        let manager = ConnectionManager::new(
            registry.clone() as Arc<dyn DeviceRegistry>,
            dialer.clone(),
            ConnectionConfig::default(),
        );
        let multiplexer = TelemetryMultiplexer::new(manager.clone());
        let shutdown = CancellationToken::new();

        let state = AppState::new(multiplexer.clone())
            .with_connect_timeout(connect_timeout)
            .with_shutdown(shutdown.clone());
        let server = TestServer::start(create_router(state)).await;

        Self {
            server,
            registry,
            dialer,
            manager,
            multiplexer,
            shutdown,
        }
    }

    fn add_router(&self, name: &str, interfaces: &[&str]) -> (DeviceId, Arc<SimulatedDevice>) {
        let device = self.dialer.add_device(
            format!("{}:8728", name),
            SimulatedDevice::with_interfaces(interfaces.iter().copied())
                .with_credentials("admin", "secret"),
        );
        let descriptor = self
            .registry
            .insert(CreateDeviceRequest {
                name: name.to_string(),
                hostname: name.to_string(),
                username: "admin".to_string(),
                password: "secret".to_string(),
                keepalive: true,
                timeout: 300_000,
                port: 8728,
                location: None,
                description: None,
                is_active: true,
            })
            .unwrap();
        (descriptor.id, device)
    }

    async fn monitor(&self, query: &str) -> Ws {
        let url = self.server.ws_url(&format!("/ws/traffic/monitor?{}", query));
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }
}

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Next JSON event, skipping non-text frames
async fn next_event(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(_) => panic!("socket closed while waiting for event"),
            _ => continue,
        }
    }
}

async fn next_event_of(ws: &mut Ws, kind: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["type"] == kind {
            return event;
        }
    }
}

async fn expect_closed(ws: &mut Ws) {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Text(text))) if text.as_str().contains("traffic_update") => continue,
            Some(Ok(Message::Text(text))) => panic!("unexpected event before close: {}", text),
            Some(Ok(_)) => continue,
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// =============================================================================
// General
// =============================================================================

#[tokio::test]
async fn test_health() {
    let gw = Gateway::start().await;

    for path in ["/health", "/ws/health"] {
        let (status, body) = gw.server.get(path).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "ok");
        assert!(body["data"]["timestamp"].is_string());
    }
}

#[tokio::test]
async fn test_unknown_route_returns_envelope() {
    let gw = Gateway::start().await;

    let (status, body) = gw.server.get("/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("/api/nope"));
}

#[tokio::test]
async fn test_wrong_method_returns_envelope() {
    let gw = Gateway::start().await;

    let (status, body) = gw.server.delete("/api/connections/status").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "DELETE not allowed on /api/connections/status");
}

// =============================================================================
// Inventory
// =============================================================================

#[tokio::test]
async fn test_router_crud() {
    let gw = Gateway::start().await;

    let (status, body) = gw
        .server
        .post_json(
            "/api/routers",
            json!({"name": "edge-1", "hostname": "edge-1", "username": "admin", "password": "secret"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let id = body["data"]["id"].as_u64().unwrap();
    assert_eq!(body["data"]["port"], 8728);
    assert_eq!(body["data"]["status"], "unknown");
    assert!(body["data"].get("password").is_none());

    let (status, body) = gw.server.get(&format!("/api/routers/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "edge-1");

    let (status, body) = gw
        .server
        .put_json(&format!("/api/routers/{}", id), json!({"location": "rack 4"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["location"], "rack 4");

    let (status, _) = gw
        .server
        .patch_json(
            &format!("/api/routers/{}/status", id),
            json!({"status": "online", "version": "7.15"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = gw.server.get(&format!("/api/routers/{}", id)).await;
    assert_eq!(body["data"]["status"], "online");
    assert_eq!(body["data"]["version"], "7.15");

    let (_, body) = gw.server.get("/api/routers/active").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = gw
        .server
        .patch_json(&format!("/api/routers/{}/active", id), json!({"is_active": false}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_active"], false);
    let (_, body) = gw.server.get("/api/routers/active").await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = gw.server.get("/api/routers").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = gw.server.delete(&format!("/api/routers/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = gw.server.get(&format!("/api/routers/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_router_validation_errors() {
    let gw = Gateway::start().await;

    let (status, body) = gw.server.get("/api/routers/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid router ID");

    let (status, body) = gw.server.get("/api/routers/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "router 99 not found");

    let (status, body) = gw
        .server
        .post_json(
            "/api/routers",
            json!({"name": " ", "hostname": "h", "username": "u", "password": "p"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "name is required");

    let (status, body) = gw.server.post_json("/api/routers", json!({"name": "x"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
}

#[tokio::test]
async fn test_deactivating_router_drops_session() {
    let gw = Gateway::start().await;
    let (id, device) = gw.add_router("edge-1", &["ether1"]);

    let (status, _) = gw
        .server
        .post(&format!("/api/connections/connect?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(gw.manager.is_connected(id));

    gw.server
        .patch_json(&format!("/api/routers/{}/active", id), json!({"is_active": false}))
        .await;
    assert!(!gw.manager.is_connected(id));
    assert_eq!(device.active_sessions(), 0);

    let (status, body) = gw
        .server
        .post(&format!("/api/connections/connect?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("not active"));
}

// =============================================================================
// Connections
// =============================================================================

#[tokio::test]
async fn test_connect_status_disconnect() {
    let gw = Gateway::start().await;
    let (id, _device) = gw.add_router("edge-1", &["ether1"]);

    let (status, body) = gw
        .server
        .get(&format!("/api/connections/connect?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().unwrap().contains("connected"));

    let (status, body) = gw.server.get("/api/connections/status").await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body["data"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["router_id"], id);
    assert_eq!(sessions[0]["router_name"], "edge-1");
    assert_eq!(sessions[0]["is_healthy"], true);

    let (_, body) = gw.server.get(&format!("/api/routers/{}", id)).await;
    assert_eq!(body["data"]["status"], "online");
    assert_eq!(body["data"]["version"], "7.14.3 (stable)");

    let (status, _) = gw
        .server
        .post(&format!("/api/connections/disconnect?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = gw.server.post("/api/connections/status").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = gw
        .server
        .post(&format!("/api/connections/disconnect?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], format!("router {} not connected", id));
}

#[tokio::test]
async fn test_connect_requires_router_id() {
    let gw = Gateway::start().await;

    for path in [
        "/api/connections/connect",
        "/api/connections/connect?router_id=",
        "/api/connections/connect?router_id=0",
        "/api/connections/connect?router_id=abc",
        "/api/interfaces",
        "/api/traffic/once?interface=ether1",
    ] {
        let (status, body) = gw.server.get(path).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", path);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "router_id is required and must be valid");
    }
}

#[tokio::test]
async fn test_connect_unknown_router_is_not_found() {
    let gw = Gateway::start().await;

    let (status, body) = gw.server.get("/api/connections/connect?router_id=42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "router 42 not found");
}

#[tokio::test]
async fn test_connect_timeout_is_408() {
    let gw = Gateway::start_with(Duration::from_millis(200)).await;
    let (id, device) = gw.add_router("slow", &["ether1"]);
    device.set_hang_dial(true);

    let (status, body) = gw
        .server
        .get(&format!("/api/connections/connect?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["success"], false);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Connection timeout after"));
}

#[tokio::test]
async fn test_connect_auth_failure_is_500() {
    let gw = Gateway::start().await;
    let (id, device) = gw.add_router("edge-1", &["ether1"]);
    device.set_reject_login(true);

    let (status, body) = gw
        .server
        .get(&format!("/api/connections/connect?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("invalid user name or password"));
}

// =============================================================================
// One-shot commands
// =============================================================================

#[tokio::test]
async fn test_interface_commands() {
    let gw = Gateway::start().await;
    let (id, device) = gw.add_router("edge-1", &["ether1", "ether2"]);

    let (status, body) = gw.server.get(&format!("/api/interfaces?router_id={}", id)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["ether1", "ether2"]);

    let (status, _) = gw
        .server
        .get(&format!("/api/interfaces/disable?router_id={}&name=ether2", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device.interface_disabled("ether2"), Some(true));

    let (_, body) = gw
        .server
        .get(&format!("/api/interfaces/list?router_id={}", id))
        .await;
    let monitorable = body["data"].as_array().unwrap();
    assert_eq!(monitorable.len(), 1);
    assert_eq!(monitorable[0]["name"], "ether1");

    let (status, _) = gw
        .server
        .post(&format!("/api/interfaces/enable?router_id={}&name=ether2", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device.interface_disabled("ether2"), Some(false));

    let (status, body) = gw
        .server
        .get(&format!("/api/interfaces/enable?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "name is required");

    let (status, body) = gw
        .server
        .get(&format!("/api/interfaces/enable?router_id={}&name=wlan9", id))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "interface wlan9 not found");
}

#[tokio::test]
async fn test_address_commands() {
    let gw = Gateway::start().await;
    let (id, _device) = gw.add_router("edge-1", &["ether1"]);

    let (status, _) = gw
        .server
        .send(gw.server.http.post(gw.server.url("/api/addresses/add")).query(&[
            ("router_id", id.to_string()),
            ("interface", "ether1".to_string()),
            ("address", "10.0.0.1/24".to_string()),
        ]))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = gw.server.get(&format!("/api/addresses?router_id={}", id)).await;
    let addresses = body["data"].as_array().unwrap();
    assert_eq!(addresses.len(), 1);
    assert_eq!(addresses[0]["address"], "10.0.0.1/24");
    assert_eq!(addresses[0]["network"], "10.0.0.0");
    let address_id = addresses[0]["id"].as_str().unwrap().to_string();

    let (status, body) = gw
        .server
        .get(&format!("/api/addresses/add?router_id={}&interface=ether1", id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "address is required");

    let (status, _) = gw
        .server
        .send(gw.server.http.delete(gw.server.url("/api/addresses/remove")).query(&[
            ("router_id", id.to_string()),
            ("id", address_id),
        ]))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = gw.server.get(&format!("/api/addresses?router_id={}", id)).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_queue_commands() {
    let gw = Gateway::start().await;
    let (id, _device) = gw.add_router("edge-1", &["ether1"]);

    let (status, _) = gw
        .server
        .send(gw.server.http.post(gw.server.url("/api/queues/add")).query(&[
            ("router_id", id.to_string()),
            ("name", "guest".to_string()),
            ("target", "10.0.0.0/24".to_string()),
            ("max-limit", "10M/10M".to_string()),
        ]))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = gw.server.get(&format!("/api/queues?router_id={}", id)).await;
    let queues = body["data"].as_array().unwrap();
    assert_eq!(queues.len(), 1);
    assert_eq!(queues[0]["name"], "guest");
    assert_eq!(queues[0]["max-limit"], "10M/10M");
    let queue_id = queues[0]["id"].as_str().unwrap().to_string();

    let (status, body) = gw
        .server
        .get(&format!("/api/queues/add?router_id={}&name=x&target=10.0.0.9", id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "max-limit is required");

    let (status, _) = gw
        .server
        .send(gw.server.http.post(gw.server.url("/api/queues/remove")).query(&[
            ("router_id", id.to_string()),
            ("id", queue_id),
        ]))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = gw.server.get(&format!("/api/queues?router_id={}", id)).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_traffic_once() {
    let gw = Gateway::start().await;
    let (id, _device) = gw.add_router("edge-1", &["ether1"]);

    let (status, body) = gw
        .server
        .get(&format!("/api/traffic/once?router_id={}&interface=ether1", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["router_id"], id);
    assert_eq!(body["data"]["interface_name"], "ether1");
    assert!(body["data"]["rx_bits_per_second"].is_u64());

    let (status, body) = gw
        .server
        .get(&format!("/api/traffic/once?router_id={}", id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "interface is required");

    let (status, body) = gw
        .server
        .get(&format!("/api/traffic/once?router_id={}&interface=wlan9", id))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("not found or no data"));
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_monitor_partial_start_failure() {
    let gw = Gateway::start().await;
    let (id, device) = gw.add_router("edge-1", &["ether1"]);

    let mut ws = gw
        .monitor(&format!("router_id={}&interfaces=ether1,doesnotexist", id))
        .await;

    let error = next_event(&mut ws).await;
    assert_eq!(error["type"], "error");
    let text = error["error"].as_str().unwrap();
    assert!(text.contains("1 of 2"), "{}", text);
    assert!(text.contains("doesnotexist"), "{}", text);

    let connected = next_event(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    assert!(connected["message"].as_str().unwrap().contains("ether1"));

    let update = next_event_of(&mut ws, "traffic_update").await;
    assert_eq!(update["interface"], "ether1");
    assert_eq!(update["data"]["interface_name"], "ether1");
    assert_eq!(update["data"]["router_id"], id);

    ws.send(Message::text(r#"{"type":"ping"}"#.to_string()))
        .await
        .unwrap();
    let pong = next_event_of(&mut ws, "pong").await;
    assert!(pong["timestamp"].is_string());

    ws.close(None).await.unwrap();
    assert!(wait_until(|| gw.multiplexer.active_subscriptions() == 0).await);
    assert!(wait_until(|| device.open_listeners() == 0).await);
}

#[tokio::test]
async fn test_monitor_rejects_invalid_parameters() {
    let gw = Gateway::start().await;
    gw.add_router("edge-1", &["ether1"]);

    let mut ws = gw.monitor("router_id=0&interface=ether1").await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["error"], "router_id is required and must be valid");
    expect_closed(&mut ws).await;

    let mut ws = gw.monitor("router_id=1").await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["error"], "interface or interfaces is required");
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_monitor_all_streams_failing_closes() {
    let gw = Gateway::start().await;
    let (id, _device) = gw.add_router("edge-1", &["ether1"]);

    let mut ws = gw.monitor(&format!("router_id={}&interface=nope", id)).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert!(event["error"].as_str().unwrap().contains("1 of 1"));
    expect_closed(&mut ws).await;
    assert_eq!(gw.multiplexer.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_monitor_clients_share_one_listener() {
    let gw = Gateway::start().await;
    let (id, device) = gw.add_router("edge-1", &["ether1"]);
    let query = format!("router_id={}&interface=ether1", id);

    let mut first = gw.monitor(&query).await;
    next_event_of(&mut first, "connected").await;
    let mut second = gw.monitor(&query).await;
    next_event_of(&mut second, "connected").await;

    assert_eq!(gw.multiplexer.consumer_count(id, "ether1"), 2);
    assert_eq!(device.open_listeners(), 1);
    assert_eq!(device.dial_attempts(), 1);

    first.close(None).await.unwrap();
    assert!(wait_until(|| gw.multiplexer.consumer_count(id, "ether1") == 1).await);

    for _ in 0..3 {
        let update = next_event_of(&mut second, "traffic_update").await;
        assert_eq!(update["interface"], "ether1");
    }
    assert_eq!(device.open_listeners(), 1);

    second.close(None).await.unwrap();
    assert!(wait_until(|| gw.multiplexer.active_subscriptions() == 0).await);
    assert!(wait_until(|| device.open_listeners() == 0).await);
}

#[tokio::test]
async fn test_monitor_ends_when_router_disconnects() {
    let gw = Gateway::start().await;
    let (id, _device) = gw.add_router("edge-1", &["ether1"]);

    let mut ws = gw.monitor(&format!("router_id={}&interface=ether1", id)).await;
    next_event_of(&mut ws, "traffic_update").await;

    gw.manager.disconnect(id).await.unwrap();

    let ended = next_event_of(&mut ws, "error").await;
    assert!(ended["error"].as_str().unwrap().contains("ether1"));
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn test_server_shutdown_closes_monitors() {
    let gw = Gateway::start().await;
    let (id, _device) = gw.add_router("edge-1", &["ether1"]);

    let mut ws = gw.monitor(&format!("router_id={}&interface=ether1", id)).await;
    next_event_of(&mut ws, "connected").await;

    gw.shutdown.cancel();
    expect_closed(&mut ws).await;
    assert!(wait_until(|| gw.multiplexer.active_subscriptions() == 0).await);
}
