//! Shared test utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, WebSocketStream};

use park_core::config::AppConfig;
use park_core::error::ParkError;
use park_stream::{ConnectionManager, ConnectionState, ProbeOutcome, Prober, StreamEvent, Topic};

/// Default test timeout.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The entry frame used throughout the tests.
pub const CAR_IN_FRAME: &str = r#"{"type":"vehicleEvent","eventType":"carIn","data":{"plateNumber":"京A12345","channelName":"东门入口","enterTime":"2024-05-01 08:30:00"}}"#;

pub type ServerConn = WebSocketStream<TcpStream>;

/// Local WebSocket server handing every accepted connection to the test.
pub struct TestServer {
    pub addr: SocketAddr,
    clients: mpsc::UnboundedReceiver<ServerConn>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, clients) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(socket).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            clients,
            handle,
        }
    }

    /// Backend base URL pointing at this server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The WebSocket URL the client is expected to resolve to.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/websocket/vehicle", self.addr)
    }

    /// Wait for the next accepted connection.
    pub async fn next_client(&mut self) -> ServerConn {
        timeout(TEST_TIMEOUT, self.clients.recv())
            .await
            .expect("timed out waiting for a client")
            .expect("server stopped")
    }

    /// Whether a connection arrives within `wait`.
    pub async fn client_within(&mut self, wait: Duration) -> bool {
        matches!(timeout(wait, self.clients.recv()).await, Ok(Some(_)))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Prober whose answer and latency the test controls. Counts every probe.
#[derive(Default)]
pub struct ScriptedProber {
    unreachable: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn reachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Make every later probe take `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            ProbeOutcome::failed(
                url,
                Duration::ZERO,
                &ParkError::ProbeRefused {
                    url: url.to_string(),
                    reason: format!("scripted refusal ({}ms budget)", timeout.as_millis()),
                },
            )
        } else {
            ProbeOutcome::reachable(url, Duration::ZERO)
        }
    }
}

/// Configuration with a single candidate pointing at `base_url` and a short
/// reconnect interval.
pub fn create_test_config(base_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.server.base_url = base_url.to_string();
    config.server.detect_page_host = false;
    config.server.page_host = None;
    config.server.alternate_port = None;
    config.server.fallback_hosts.clear();
    config.reconnect.base_interval_ms = 20;
    config.probe.timeout_ms = 1_000;
    config
}

/// Manager for `server` using a scripted prober.
pub fn create_test_manager(
    server: &TestServer,
    config: impl FnOnce(&mut AppConfig),
) -> (ConnectionManager, Arc<ScriptedProber>) {
    let mut cfg = create_test_config(&server.base_url());
    config(&mut cfg);
    let prober = ScriptedProber::reachable();
    let manager = ConnectionManager::with_prober(&cfg, prober.clone());
    (manager, prober)
}

/// Records every event published on the manager's bus.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<StreamEvent>>>,
}

impl EventLog {
    pub fn attach(manager: &ConnectionManager) -> Self {
        let log = Self::default();
        for topic in Topic::ALL {
            let events = log.events.clone();
            manager.on(topic, move |event| events.lock().unwrap().push(event.clone()));
        }
        log
    }

    pub fn count(&self, topic: Topic) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.topic() == topic)
            .count()
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.events.lock().unwrap().iter().map(StreamEvent::topic).collect()
    }

    pub fn error_kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.error().map(ParkError::kind))
            .collect()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Poll `condition` until it holds or the test timeout passes.
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let result = timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    result.is_ok()
}

/// Wait until the manager reaches `state`.
pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.state_receiver();
    timeout(TEST_TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .expect("state channel closed");
}
