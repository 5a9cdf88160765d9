//! Device link manager.
//!
//! [`DeviceLink`] is a cheap, cloneable handle. [`LinkDriver`] is the actor
//! that owns the socket, the retry timer, the prober and any in-flight
//! connect. The driver handles one event at a time, so state transitions never
//! interleave.
//!
//! ```text
//! idle ──connect──▶ connecting ──open──▶ connected ──close 1000──▶ idle
//!                      │                    │
//!                      └──fail──▶ retry ◀───┘ other close / error
//!                                  │
//!                                  ├──timer──▶ connecting
//!                                  └──ceiling──▶ failed (idle + error)
//! ```

use crate::backoff::{ReconnectPolicy, RetryTimer};
use crate::endpoint::Endpoint;
use crate::error::{LinkError, TransportError};
use crate::fanout::FanoutRegistry;
use crate::keepalive::{build_ping, LivenessProber};
use crate::state::{ConnectionState, StateStore};
use crate::transport::{Connection, Connector, OutboundFrame, TransportEvent, CLOSE_NORMAL};
use devlink_wire::{decode_frame, InboundFrame, OutboundCommand, Token};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Configuration of a device link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Initial device address
    pub endpoint: Endpoint,
    /// Backoff and retry ceiling
    pub reconnect: ReconnectPolicy,
    /// Keep-alive period while connected
    pub ping_interval: Duration,
    /// Open the connection as soon as the driver starts
    pub auto_connect: bool,
}

impl LinkConfig {
    /// Default settings for `endpoint`
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            reconnect: ReconnectPolicy::default(),
            ping_interval: Duration::from_secs(30),
            auto_connect: true,
        }
    }
}

/// Control requests processed by the driver
#[derive(Debug)]
enum LinkCommand {
    Connect { done: oneshot::Sender<()> },
    Disconnect { done: oneshot::Sender<()> },
    Reconnect { done: oneshot::Sender<()> },
    UpdateEndpoint { endpoint: Endpoint, done: oneshot::Sender<()> },
    ClearError { done: oneshot::Sender<()> },
    Shutdown { done: oneshot::Sender<()> },
}

type Writer = Option<mpsc::UnboundedSender<OutboundFrame>>;

/// Handle to the device link
#[derive(Debug, Clone)]
pub struct DeviceLink {
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    writer: watch::Receiver<Writer>,
    store: StateStore,
    registry: FanoutRegistry,
}

impl DeviceLink {
    /// Create a link and the driver that must be run for it to do anything
    pub fn new<C: Connector>(config: LinkConfig, connector: C) -> (Self, LinkDriver<C>) {
        let store = StateStore::new(ConnectionState::new(
            config.endpoint.clone(),
            config.reconnect.max_attempts,
        ));
        let registry = FanoutRegistry::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = watch::channel(None);

        let link = Self {
            command_tx,
            writer: writer_rx,
            store: store.clone(),
            registry: registry.clone(),
        };
        let driver = LinkDriver {
            connector: Arc::new(connector),
            policy: config.reconnect,
            auto_connect: config.auto_connect,
            store,
            registry,
            writer_tx,
            command_rx,
            conn: None,
            connect_task: None,
            retry: RetryTimer::default(),
            prober: LivenessProber::new(config.ping_interval),
        };
        (link, driver)
    }

    /// Create a link and spawn its driver on the current runtime
    pub fn spawn<C: Connector>(config: LinkConfig, connector: C) -> (Self, JoinHandle<()>) {
        let (link, driver) = Self::new(config, connector);
        let handle = tokio::spawn(driver.run());
        (link, handle)
    }

    /// Send a command to the device.
    ///
    /// Returns false without writing anything when the link is not open.
    /// Commands are never queued for later delivery.
    pub fn send(&self, command: impl Into<OutboundCommand>) -> bool {
        let command = command.into();
        let writer = self.writer.borrow().clone();
        let writer = match writer {
            Some(writer) => writer,
            None => {
                warn!("Not connected, dropping {} command", command.name());
                return false;
            }
        };

        let text = match command.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} command: {}", command.name(), e);
                return false;
            }
        };

        if writer.send(OutboundFrame::Text(text)).is_err() {
            warn!("Connection went away, dropping {} command", command.name());
            return false;
        }
        debug!("Sent {} command", command.name());
        true
    }

    /// Whether the socket is open
    pub fn is_connected(&self) -> bool {
        self.store.connected()
    }

    /// Connection state store
    pub fn state(&self) -> &StateStore {
        &self.store
    }

    /// Clone of the current connection state
    pub fn snapshot(&self) -> ConnectionState {
        self.store.snapshot()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.store.subscribe()
    }

    /// Message fan-out registry
    pub fn registry(&self) -> &FanoutRegistry {
        &self.registry
    }

    /// Register an inbound message handler under `key`
    pub fn register<F>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(&InboundFrame) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.register(key, handler);
    }

    /// Remove the handler under `key`
    pub fn unregister(&self, key: &str) -> bool {
        self.registry.unregister(key)
    }

    /// Open the connection; no-op if already open or opening
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.request(|done| LinkCommand::Connect { done }).await
    }

    /// Close the connection cleanly and cancel every pending timer
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.request(|done| LinkCommand::Disconnect { done }).await
    }

    /// Tear down, reset the attempt counter, and connect again
    pub async fn reconnect(&self) -> Result<(), LinkError> {
        self.request(|done| LinkCommand::Reconnect { done }).await
    }

    /// Switch to a new device address and connect to it immediately.
    ///
    /// Malformed addresses are rejected before anything is torn down.
    pub async fn update_endpoint(&self, endpoint: &str) -> Result<(), LinkError> {
        let endpoint = Endpoint::parse(endpoint)?;
        self.request(|done| LinkCommand::UpdateEndpoint { endpoint, done })
            .await
    }

    /// Clear the recorded error without touching the connection
    pub async fn clear_error(&self) -> Result<(), LinkError> {
        self.request(|done| LinkCommand::ClearError { done }).await
    }

    /// Disconnect and stop the driver
    pub async fn shutdown(&self) -> Result<(), LinkError> {
        self.request(|done| LinkCommand::Shutdown { done }).await
    }

    async fn request<F>(&self, make: F) -> Result<(), LinkError>
    where
        F: FnOnce(oneshot::Sender<()>) -> LinkCommand,
    {
        let (done, applied) = oneshot::channel();
        self.command_tx
            .send(make(done))
            .map_err(|_| LinkError::DriverStopped)?;
        applied.await.map_err(|_| LinkError::DriverStopped)
    }
}

/// Actor owning the socket and timers of a [`DeviceLink`]
pub struct LinkDriver<C: Connector> {
    connector: Arc<C>,
    policy: ReconnectPolicy,
    auto_connect: bool,
    store: StateStore,
    registry: FanoutRegistry,
    writer_tx: watch::Sender<Writer>,
    command_rx: mpsc::UnboundedReceiver<LinkCommand>,
    conn: Option<Connection>,
    connect_task: Option<JoinHandle<Result<Connection, TransportError>>>,
    retry: RetryTimer,
    prober: LivenessProber,
}

impl<C: Connector> LinkDriver<C> {
    /// Run until shut down or until every [`DeviceLink`] handle is dropped
    pub async fn run(mut self) {
        info!("Starting device link to {}", self.store.endpoint());

        if self.auto_connect {
            self.start_connect();
        }

        loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => match command {
                    Some(LinkCommand::Shutdown { done }) => {
                        self.disconnect();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.disconnect();
                        break;
                    }
                },

                event = next_event(&mut self.conn) => self.on_transport_event(event),

                outcome = connect_outcome(&mut self.connect_task) => {
                    self.connect_task = None;
                    self.on_connect_outcome(outcome);
                }

                _ = self.retry.fired() => {
                    debug!("Retry timer fired");
                    self.start_connect();
                }

                _ = self.prober.tick() => {
                    trace!("Sending keep-alive ping");
                    self.write(&build_ping());
                }
            }
        }

        info!("Device link stopped");
    }

    fn handle_command(&mut self, command: LinkCommand) {
        match command {
            LinkCommand::Connect { done } => {
                self.start_connect();
                let _ = done.send(());
            }
            LinkCommand::Disconnect { done } => {
                self.disconnect();
                let _ = done.send(());
            }
            LinkCommand::Reconnect { done } => {
                info!("Manual reconnect requested");
                self.disconnect();
                self.store.update(|s| {
                    s.attempt_count = 0;
                    s.error = None;
                });
                self.start_connect();
                let _ = done.send(());
            }
            LinkCommand::UpdateEndpoint { endpoint, done } => {
                info!("Endpoint changed to {}", endpoint);
                self.disconnect();
                self.store.update(|s| {
                    s.endpoint = endpoint;
                    s.attempt_count = 0;
                    s.error = None;
                });
                self.start_connect();
                let _ = done.send(());
            }
            LinkCommand::ClearError { done } => {
                self.store.update(|s| s.error = None);
                let _ = done.send(());
            }
            LinkCommand::Shutdown { done } => {
                // Handled by the run loop
                let _ = done.send(());
            }
        }
    }

    fn start_connect(&mut self) {
        if self.conn.is_some() || self.connect_task.is_some() {
            debug!("Connect ignored, link already open or opening");
            return;
        }

        self.retry.cancel();
        let endpoint = self.store.endpoint();
        let attempt = self.store.attempt_count();
        self.store.update(|s| {
            s.connecting = true;
            s.error = None;
            s.retry_scheduled = false;
        });
        info!("Connecting to {} (attempt {})", endpoint, attempt + 1);

        let connector = self.connector.clone();
        self.connect_task = Some(tokio::spawn(async move {
            connector.connect(&endpoint).await
        }));
    }

    fn on_connect_outcome(&mut self, outcome: Result<Result<Connection, TransportError>, JoinError>) {
        match outcome {
            Ok(Ok(conn)) => self.on_open(conn),
            Ok(Err(e)) => self.on_failure(e.to_string()),
            Err(e) => self.on_failure(format!("connect task failed: {}", e)),
        }
    }

    fn on_open(&mut self, conn: Connection) {
        // The handshake goes out before the writer is published so no caller
        // frame can precede it.
        let outbound = conn.outbound.clone();
        self.conn = Some(conn);
        self.write(&OutboundCommand::Token(Token::Connect));
        self.writer_tx.send_replace(Some(outbound));

        self.store.update(|s| {
            s.connected = true;
            s.connecting = false;
            s.error = None;
            s.attempt_count = 0;
            s.retry_scheduled = false;
            s.stats.connects += 1;
        });
        self.prober.start();
        info!(
            "Connected to {} (ping every {:?})",
            self.store.endpoint(),
            self.prober.period()
        );
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Text(text)) => self.on_frame(&text),
            Some(event) if event.is_clean_close() => {
                info!("Device closed the connection cleanly ({:?})", event);
                self.teardown();
                self.store.update(|s| {
                    s.connected = false;
                    s.connecting = false;
                });
            }
            Some(TransportEvent::Closed { code, reason }) => {
                self.teardown();
                if reason.is_empty() {
                    self.on_failure(format!("connection closed with code {}", code));
                } else {
                    self.on_failure(format!("connection closed with code {}: {}", code, reason));
                }
            }
            Some(TransportEvent::Error(e)) => {
                self.teardown();
                self.on_failure(e);
            }
            None => {
                self.teardown();
                self.on_failure("transport ended unexpectedly".to_string());
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        let frame = match decode_frame(text) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                self.store.update(|s| s.stats.frames_dropped += 1);
                return;
            }
        };

        self.store.update(|s| {
            s.last_message = Some(frame.clone());
            s.stats.frames_received += 1;
        });

        let report = self.registry.dispatch(&frame);
        trace!(
            "Dispatched frame to {} handlers ({} failed)",
            report.delivered + report.failed,
            report.failed
        );
    }

    fn on_failure(&mut self, reason: String) {
        let attempt = self.store.attempt_count();
        let endpoint = self.store.endpoint();

        match self.policy.next_delay(attempt) {
            Some(delay) => {
                self.retry.schedule(delay);
                warn!(
                    "Link to {} failed: {}; retry {}/{} in {:?}",
                    endpoint,
                    reason,
                    attempt + 1,
                    self.policy.max_attempts,
                    delay
                );
                self.store.update(|s| {
                    s.connected = false;
                    s.connecting = false;
                    s.error = Some(reason);
                    s.attempt_count = attempt + 1;
                    s.retry_scheduled = true;
                });
            }
            None => {
                error!(
                    "Giving up on {} after {} attempts: {}",
                    endpoint, attempt, reason
                );
                let max_attempts = self.policy.max_attempts;
                self.store.update(|s| {
                    s.connected = false;
                    s.connecting = false;
                    s.retry_scheduled = false;
                    s.error = Some(format!(
                        "max reconnect attempts ({}) reached: {}",
                        max_attempts, reason
                    ));
                });
            }
        }
    }

    fn write(&mut self, command: &OutboundCommand) -> bool {
        let conn = match self.conn.as_ref() {
            Some(conn) => conn,
            None => return false,
        };
        match command.encode() {
            Ok(text) => conn.outbound.send(OutboundFrame::Text(text)).is_ok(),
            Err(e) => {
                warn!("Failed to encode {} command: {}", command.name(), e);
                false
            }
        }
    }

    /// Drop the socket without a close handshake
    fn teardown(&mut self) {
        self.prober.stop();
        self.writer_tx.send_replace(None);
        self.conn = None;
    }

    fn disconnect(&mut self) {
        self.retry.cancel();
        if let Some(task) = self.connect_task.take() {
            task.abort();
            debug!("Aborted in-flight connect");
        }
        self.prober.stop();
        self.writer_tx.send_replace(None);

        if let Some(conn) = self.conn.take() {
            let _ = conn.outbound.send(OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: "client disconnect".to_string(),
            });
            info!("Disconnected from {}", self.store.endpoint());
        }

        self.store.update(|s| {
            s.connected = false;
            s.connecting = false;
            s.retry_scheduled = false;
        });
    }
}

async fn next_event(conn: &mut Option<Connection>) -> Option<TransportEvent> {
    match conn {
        Some(conn) => conn.inbound.recv().await,
        None => pending().await,
    }
}

async fn connect_outcome(
    task: &mut Option<JoinHandle<Result<Connection, TransportError>>>,
) -> Result<Result<Connection, TransportError>, JoinError> {
    match task {
        Some(task) => task.await,
        None => pending().await,
    }
}
