//! WebSocket connection manager.
//!
//! Owns the single live connection to the vehicle event service: resolves an
//! endpoint, opens the socket, feeds inbound frames to the classifier, and
//! reconnects with a linear backoff when the connection drops.
//!
//! Every connection attempt is tagged with an epoch. `disconnect()` and an
//! explicit `connect()` bump the epoch, so callbacks from an older socket or
//! an abandoned resolution cannot touch the current state.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use park_core::config::AppConfig;
use park_core::error::{ParkError, ParkResult};

use crate::backoff::{ReconnectPolicy, ReconnectTimer};
use crate::bus::{EventBus, StreamEvent, Subscription, Topic};
use crate::classifier::MessageClassifier;
use crate::endpoint::{DiagnosticReport, EndpointResolver, Prober, WsProber};
use crate::events::{ConnectionState, VehicleEvent};
use crate::records::RecordStore;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Snapshot of the manager, as shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub reconnect_attempts: u32,
    pub record_count: usize,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Explicit,
    Reconnect,
}

enum CloseReason {
    Closed(String),
    Failed(String),
}

/// The live socket: a writer task fed by `outbound` and a reader task.
struct Transport {
    endpoint: String,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Shared {
    state: ConnectionState,
    attempts: u32,
    epoch: u64,
    transport: Option<Transport>,
    timer: Option<ReconnectTimer>,
}

struct Inner {
    resolver: EndpointResolver,
    policy: ReconnectPolicy,
    open_timeout: Duration,
    bus: EventBus,
    records: RecordStore,
    classifier: MessageClassifier,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Client for the vehicle event stream.
///
/// Cloning yields another handle to the same connection. Events are
/// published synchronously on the [`EventBus`]; handlers run while the
/// manager holds its state lock and must not block.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager that probes endpoints over real WebSockets.
    pub fn new(config: &AppConfig) -> Self {
        Self::with_prober(config, Arc::new(WsProber))
    }

    /// Create a manager with a custom endpoint prober.
    pub fn with_prober(config: &AppConfig, prober: Arc<dyn Prober>) -> Self {
        let bus = EventBus::new();
        let records = RecordStore::new(config.history.capacity);
        let classifier = MessageClassifier::new(bus.clone(), records.clone());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                resolver: EndpointResolver::with_prober(config, prober),
                policy: ReconnectPolicy::from_config(&config.reconnect),
                open_timeout: config.probe.timeout(),
                bus,
                records,
                classifier,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    attempts: 0,
                    epoch: 0,
                    transport: None,
                    timer: None,
                }),
                state_tx,
            }),
        }
    }

    /// Connect to the first reachable endpoint.
    ///
    /// Does nothing while already connecting or connected. Otherwise any
    /// pending reconnect is cancelled and the attempt counter reset. When no
    /// candidate answers the state becomes `Failed` and the aggregated probe
    /// failures are returned and published on `Error`. If the socket fails
    /// to open after a successful probe, automatic reconnection takes over.
    ///
    /// The attempt runs on its own task: dropping the returned future does
    /// not abandon it, and the state still settles once it completes.
    pub async fn connect(&self) -> ParkResult<()> {
        let epoch = {
            let mut shared = self.inner.shared.lock().await;
            if shared.state.is_active() {
                debug!("already {}, ignoring connect", shared.state);
                return Ok(());
            }
            if let Some(timer) = shared.timer.take() {
                timer.cancel();
            }
            shared.attempts = 0;
            shared.epoch += 1;
            self.inner.set_state(&mut shared, ConnectionState::Connecting);
            shared.epoch
        };
        let attempt = tokio::spawn(Arc::clone(&self.inner).establish(epoch, Trigger::Explicit));
        match attempt.await {
            Ok(result) => result,
            Err(e) => Err(ParkError::Internal(format!("connect task failed: {e}"))),
        }
    }

    /// Close the connection and stop reconnecting. Safe in any state.
    pub async fn disconnect(&self) {
        let mut shared = self.inner.shared.lock().await;
        shared.epoch += 1;
        if let Some(timer) = shared.timer.take() {
            debug!("cancelling reconnect attempt {}", timer.attempt());
            timer.cancel();
        }
        let transport = shared.transport.take();
        self.inner.set_state(&mut shared, ConnectionState::Disconnected);

        if let Some(transport) = transport {
            transport.reader.abort();
            if transport.outbound.send(Message::Close(None)).is_err() {
                transport.writer.abort();
            }
            info!("disconnected from {}", transport.endpoint);
            self.inner.bus.emit(StreamEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
        }
    }

    /// Serialize `payload` as JSON and send it on the live connection.
    ///
    /// Outside `Connected` nothing is queued: the failure is published on
    /// `Error` and returned.
    pub async fn send<T>(&self, payload: &T) -> ParkResult<()>
    where
        T: Serialize + ?Sized,
    {
        let shared = self.inner.shared.lock().await;
        let outcome = match shared
            .transport
            .as_ref()
            .filter(|_| shared.state == ConnectionState::Connected)
        {
            None => Err(ParkError::SendFailure(format!(
                "not connected (state: {})",
                shared.state
            ))),
            Some(transport) => match serde_json::to_string(payload) {
                Ok(text) => transport
                    .outbound
                    .send(Message::Text(text))
                    .map_err(|_| ParkError::SendFailure("connection writer has stopped".into())),
                Err(e) => Err(ParkError::Serialization(e.to_string())),
            },
        };

        if let Err(e) = &outcome {
            warn!("send rejected: {e}");
            self.inner.bus.emit(StreamEvent::Error(e.clone()));
        }
        outcome
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let shared = self.inner.shared.lock().await;
        ConnectionStatus {
            state: shared.state,
            is_connected: shared.state == ConnectionState::Connected,
            reconnect_attempts: shared.attempts,
            record_count: self.inner.records.len(),
            endpoint: shared.transport.as_ref().map(|t| t.endpoint.clone()),
        }
    }

    /// Endpoint of the live connection, if any.
    pub async fn current_endpoint(&self) -> Option<String> {
        let shared = self.inner.shared.lock().await;
        shared.transport.as_ref().map(|t| t.endpoint.clone())
    }

    pub fn on<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.inner.bus.on(topic, handler)
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inner.bus.off(subscription)
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn records(&self) -> &RecordStore {
        &self.inner.records
    }

    /// Up to `n` most recent vehicle records, newest first.
    pub fn latest_records(&self, n: usize) -> Vec<Arc<VehicleEvent>> {
        self.inner.records.latest(n)
    }

    pub fn clear_records(&self) {
        self.inner.records.clear();
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    /// Candidate endpoints in resolution order.
    pub fn candidates(&self) -> Vec<String> {
        self.inner.resolver.candidates()
    }

    /// Probe every candidate endpoint. Does not affect the connection.
    pub async fn diagnose(&self) -> DiagnosticReport {
        self.inner.resolver.diagnose().await
    }
}

impl Inner {
    fn set_state(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state != state {
            info!("stream state: {} -> {}", shared.state, state);
            shared.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// Resolve an endpoint and open the socket for attempt `epoch`.
    async fn establish(self: Arc<Self>, epoch: u64, trigger: Trigger) -> ParkResult<()> {
        let endpoint = match self.resolver.resolve().await {
            Ok(resolution) => resolution.endpoint,
            Err(e) => return self.connect_failed(epoch, trigger, e).await,
        };

        debug!("opening {endpoint}");
        let stream = match timeout(self.open_timeout, connect_async(endpoint.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                let error = ParkError::Socket(format!("failed to open {endpoint}: {e}"));
                return self.connect_failed(epoch, trigger, error).await;
            }
            Err(_) => {
                let error = ParkError::Socket(format!(
                    "opening {endpoint} timed out after {}ms",
                    self.open_timeout.as_millis()
                ));
                return self.connect_failed(epoch, trigger, error).await;
            }
        };

        self.on_open(epoch, endpoint, stream).await;
        Ok(())
    }

    async fn on_open(self: &Arc<Self>, epoch: u64, endpoint: String, stream: WsStream) {
        let mut shared = self.shared.lock().await;
        if shared.epoch != epoch || shared.state != ConnectionState::Connecting {
            drop(shared);
            debug!("discarding superseded connection to {endpoint}");
            let mut stream = stream;
            let _ = stream.close(None).await;
            return;
        }

        let (sink, source) = stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(sink, outbound_rx));

        shared.attempts = 0;
        self.set_state(&mut shared, ConnectionState::Connected);
        info!("connected to {endpoint}");
        self.bus.emit(StreamEvent::Connected {
            endpoint: Some(endpoint.clone()),
            ack: None,
        });

        let reader = tokio::spawn(Arc::clone(self).read_loop(epoch, source));
        shared.transport = Some(Transport {
            endpoint,
            outbound,
            reader,
            writer,
        });
    }

    async fn connect_failed(
        self: &Arc<Self>,
        epoch: u64,
        trigger: Trigger,
        error: ParkError,
    ) -> ParkResult<()> {
        let mut shared = self.shared.lock().await;
        if shared.epoch != epoch || shared.state != ConnectionState::Connecting {
            debug!("ignoring failure of a superseded attempt: {error}");
            return Err(error);
        }

        warn!("connection attempt failed: {error}");
        self.bus.emit(StreamEvent::Error(error.clone()));
        if trigger == Trigger::Explicit && error.is_probe_failure() {
            self.set_state(&mut shared, ConnectionState::Failed);
        } else {
            self.set_state(&mut shared, ConnectionState::Disconnected);
            self.schedule_reconnect(&mut shared, epoch);
        }
        Err(error)
    }

    async fn read_loop(self: Arc<Self>, epoch: u64, mut source: SplitStream<WsStream>) {
        let reason = loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.classifier.handle_frame(&text);
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        self.classifier.handle_frame(text);
                    }
                    Err(_) => debug!("ignoring non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed by server ({} {})", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "closed by server".to_string());
                    break CloseReason::Closed(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break CloseReason::Failed(e.to_string()),
                None => break CloseReason::Closed("connection closed".to_string()),
            }
        };
        self.on_transport_closed(epoch, reason).await;
    }

    async fn on_transport_closed(self: &Arc<Self>, epoch: u64, reason: CloseReason) {
        let mut shared = self.shared.lock().await;
        if shared.epoch != epoch {
            return;
        }
        let Some(transport) = shared.transport.take() else {
            return;
        };
        transport.writer.abort();

        let (reason, error) = match reason {
            CloseReason::Closed(reason) => (reason, None),
            CloseReason::Failed(reason) => {
                let error = ParkError::Socket(reason.clone());
                (reason, Some(error))
            }
        };
        warn!("connection to {} lost: {reason}", transport.endpoint);

        self.set_state(&mut shared, ConnectionState::Disconnected);
        self.bus.emit(StreamEvent::Disconnected { reason });
        if let Some(error) = error {
            self.bus.emit(StreamEvent::Error(error));
        }
        self.schedule_reconnect(&mut shared, epoch);
    }

    /// Arm the next reconnect, or give up when the budget is spent.
    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared, epoch: u64) {
        if !self.policy.should_reconnect(shared.attempts) {
            error!("giving up after {} reconnect attempt(s)", shared.attempts);
            self.set_state(shared, ConnectionState::Failed);
            self.bus.emit(StreamEvent::Error(ParkError::ReconnectExhausted {
                attempts: shared.attempts,
            }));
            return;
        }

        shared.attempts += 1;
        let attempt = shared.attempts;
        let delay = self.policy.delay_for_attempt(attempt);
        self.set_state(shared, ConnectionState::Reconnecting);
        warn!(
            "reconnect attempt {}/{} in {:.1}s",
            attempt,
            self.policy.max_attempts,
            delay.as_secs_f64()
        );

        let inner = Arc::clone(self);
        let timer = ReconnectTimer::schedule(attempt, delay, inner.reconnect_now(epoch));
        if let Some(previous) = shared.timer.replace(timer) {
            previous.cancel();
        }
    }

    fn reconnect_now(self: Arc<Self>, epoch: u64) -> BoxFuture<'static, ()> {
        async move {
            {
                let mut shared = self.shared.lock().await;
                if shared.epoch != epoch || shared.state != ConnectionState::Reconnecting {
                    return;
                }
                // This task is the pending timer; detach it rather than abort.
                drop(shared.timer.take());
                self.set_state(&mut shared, ConnectionState::Connecting);
            }
            if let Err(e) = Arc::clone(&self).establish(epoch, Trigger::Reconnect).await {
                debug!("reconnect attempt failed: {e}");
            }
        }
        .boxed()
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("socket write failed: {e}");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}
