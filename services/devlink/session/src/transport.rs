//! WebSocket and in-memory transports for the device link.
//!
//! A [`Connector`] opens one socket and hands back a [`Connection`]: an
//! outbound frame channel and an inbound event channel. A pump task owned by
//! the transport moves frames between those channels and the socket, so the
//! link driver never blocks on socket I/O.

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Close code of an intentional, clean shutdown
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the socket vanished without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code reported when the peer sent a close frame without a code
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Frame written towards the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Text frame
    Text(String),
    /// Close the socket with a code and reason
    Close {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Lifecycle or data event coming from the device side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame received
    Text(String),
    /// Socket closed
    Closed {
        /// Close code (1000 = clean)
        code: u16,
        /// Close reason
        reason: String,
    },
    /// Transport-level failure; the socket is unusable afterwards
    Error(String),
}

impl TransportEvent {
    /// Whether the event is a clean close
    pub fn is_clean_close(&self) -> bool {
        matches!(self, TransportEvent::Closed { code, .. } if *code == CLOSE_NORMAL)
    }
}

/// An open socket, seen from the link side
#[derive(Debug)]
pub struct Connection {
    /// Frames to write to the device
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    /// Events read from the device
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Connection {
    /// Create a connection plus the transport-side ends of its channels
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<OutboundFrame>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            outbound_rx,
            inbound_tx,
        )
    }
}

/// Opens sockets to the device
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `endpoint`
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector with the given open timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        if endpoint.is_secure() && !cfg!(feature = "tls") {
            return Err(TransportError::UnsupportedScheme("wss".to_string()));
        }

        debug!("Opening WebSocket to {}", endpoint);
        let (ws, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(endpoint.as_str()))
                .await
                .map_err(|_| TransportError::Timeout(self.connect_timeout))?
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!("WebSocket open to {}", endpoint);

        let (connection, mut outbound_rx, inbound_tx) = Connection::pair();
        let (mut sink, mut stream) = ws.split();
        let peer = endpoint.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => match frame {
                        Some(OutboundFrame::Text(text)) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                warn!("Write to {} failed: {}", peer, e);
                                let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                                break;
                            }
                        }
                        Some(OutboundFrame::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            };
                            if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                                debug!("Close handshake to {} failed: {}", peer, e);
                            }
                            break;
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },

                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if inbound_tx.send(TransportEvent::Text(text.as_str().to_owned())).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => {
                                if inbound_tx.send(TransportEvent::Text(text)).is_err() {
                                    break;
                                }
                            }
                            Err(_) => warn!("Dropping non-UTF-8 binary frame from {}", peer),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                                .unwrap_or((CLOSE_NO_STATUS, String::new()));
                            let _ = inbound_tx.send(TransportEvent::Closed { code, reason });
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                            break;
                        }
                        None => {
                            let _ = inbound_tx.send(TransportEvent::Closed {
                                code: CLOSE_ABNORMAL,
                                reason: "stream ended".to_string(),
                            });
                            break;
                        }
                    },
                }
            }
            debug!("WebSocket pump for {} finished", peer);
        });

        Ok(connection)
    }
}

/// In-process transport with a scriptable device peer.
///
/// Used by tests and demos in place of a real controller.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    /// Connector that hands each accepted connection to a [`DevicePeer`]
    #[derive(Debug, Clone)]
    pub struct MemoryConnector {
        accepting: Arc<AtomicBool>,
        connect_delay_ms: Arc<AtomicU64>,
        attempts: Arc<Mutex<Vec<(Instant, Endpoint)>>>,
        peers_tx: mpsc::UnboundedSender<DevicePeer>,
        peers_rx: Arc<Mutex<mpsc::UnboundedReceiver<DevicePeer>>>,
    }

    impl MemoryConnector {
        /// Create a connector that accepts connections
        pub fn new() -> Self {
            let (peers_tx, peers_rx) = mpsc::unbounded_channel();
            Self {
                accepting: Arc::new(AtomicBool::new(true)),
                connect_delay_ms: Arc::new(AtomicU64::new(0)),
                attempts: Arc::new(Mutex::new(Vec::new())),
                peers_tx,
                peers_rx: Arc::new(Mutex::new(peers_rx)),
            }
        }

        /// Accept or refuse future connection attempts
        pub fn set_accepting(&self, accepting: bool) {
            self.accepting.store(accepting, Ordering::SeqCst);
        }

        /// Hold each attempt open this long before it resolves
        pub fn set_connect_delay(&self, delay: Duration) {
            let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            self.connect_delay_ms.store(millis, Ordering::SeqCst);
        }

        /// Every connection attempt so far, with the time it was made
        pub async fn attempts(&self) -> Vec<(Instant, Endpoint)> {
            self.attempts.lock().await.clone()
        }

        /// Wait for the next accepted connection
        pub async fn accept(&self) -> Option<DevicePeer> {
            self.peers_rx.lock().await.recv().await
        }
    }

    impl Default for MemoryConnector {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
            self.attempts.lock().await.push((Instant::now(), endpoint.clone()));

            let delay_ms = self.connect_delay_ms.load(Ordering::SeqCst);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            if !self.accepting.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("connection refused".to_string()));
            }

            let (connection, from_link, to_link) = Connection::pair();
            let peer = DevicePeer {
                endpoint: endpoint.clone(),
                to_link,
                from_link,
            };
            self.peers_tx
                .send(peer)
                .map_err(|_| TransportError::Connect("memory device gone".to_string()))?;
            Ok(connection)
        }
    }

    /// Device side of an in-memory connection
    #[derive(Debug)]
    pub struct DevicePeer {
        /// Endpoint the link dialed
        pub endpoint: Endpoint,
        to_link: mpsc::UnboundedSender<TransportEvent>,
        from_link: mpsc::UnboundedReceiver<OutboundFrame>,
    }

    impl DevicePeer {
        /// Push a text frame to the link
        pub fn push_text(&self, text: impl Into<String>) -> bool {
            self.to_link.send(TransportEvent::Text(text.into())).is_ok()
        }

        /// Close the socket from the device side
        pub fn close(&self, code: u16, reason: &str) -> bool {
            self.to_link
                .send(TransportEvent::Closed {
                    code,
                    reason: reason.to_string(),
                })
                .is_ok()
        }

        /// Report a transport failure to the link
        pub fn fail(&self, error: &str) -> bool {
            self.to_link.send(TransportEvent::Error(error.to_string())).is_ok()
        }

        /// Next frame written by the link, waiting if none is buffered
        pub async fn recv(&mut self) -> Option<OutboundFrame> {
            self.from_link.recv().await
        }

        /// Next frame written by the link, if one is buffered
        pub fn try_recv(&mut self) -> Option<OutboundFrame> {
            self.from_link.try_recv().ok()
        }

        /// Next text frame written by the link, skipping keep-alive probes
        pub async fn recv_command(&mut self) -> Option<String> {
            while let Some(frame) = self.from_link.recv().await {
                match frame {
                    OutboundFrame::Text(text) if text == r#"{"action":"ping"}"# => continue,
                    OutboundFrame::Text(text) => return Some(text),
                    OutboundFrame::Close { .. } => return None,
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryConnector;
    use super::*;

    #[test]
    fn test_clean_close_detection() {
        assert!(TransportEvent::Closed { code: CLOSE_NORMAL, reason: String::new() }.is_clean_close());
        assert!(!TransportEvent::Closed { code: CLOSE_ABNORMAL, reason: String::new() }.is_clean_close());
        assert!(!TransportEvent::Error("reset".into()).is_clean_close());
    }

    #[tokio::test]
    async fn test_memory_connector_roundtrip() {
        let connector = MemoryConnector::new();
        let endpoint = Endpoint::parse("ws://device.test/ws").unwrap();

        let mut connection = connector.connect(&endpoint).await.unwrap();
        let mut peer = connector.accept().await.unwrap();
        assert_eq!(peer.endpoint, endpoint);

        connection.outbound.send(OutboundFrame::Text("connect".into())).unwrap();
        assert_eq!(peer.recv().await, Some(OutboundFrame::Text("connect".into())));

        assert!(peer.push_text("{}"));
        assert_eq!(connection.inbound.recv().await, Some(TransportEvent::Text("{}".into())));
    }

    #[tokio::test]
    async fn test_memory_connector_refuses() {
        let connector = MemoryConnector::new();
        connector.set_accepting(false);
        let endpoint = Endpoint::parse("ws://device.test/ws").unwrap();

        let result = connector.connect(&endpoint).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(connector.attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_websocket_connector_refused() {
        let connector = WebSocketConnector::new(Duration::from_secs(2));
        // Nothing listens on port 1 of the loopback address
        let endpoint = Endpoint::parse("ws://127.0.0.1:1/ws").unwrap();
        assert!(connector.connect(&endpoint).await.is_err());
    }
}
