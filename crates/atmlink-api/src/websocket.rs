//! Duplex WebSocket transport with bounded auto-reconnect.
//!
//! Connects to a simulation server, decodes inbound frames into
//! [`InboundMessage`]s and publishes them, together with connection
//! lifecycle changes, as [`TransportEvent`]s on a caller-owned
//! [`tokio::sync::broadcast`] channel. Outbound messages are queued through
//! the [`WebSocketHandle`] and written by the background task.
//!
//! # Example
//!
//! ```rust,ignore
//! use atmlink_api::websocket::{ReconnectConfig, TransportEvent, WebSocketHandle};
//! use tokio::sync::broadcast;
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let (events, mut rx) = broadcast::channel(256);
//! let url = Url::parse("ws://127.0.0.1:8082/ws")?;
//! let handle = WebSocketHandle::connect(url, ReconnectConfig::default(), CancellationToken::new(), events)?;
//!
//! while let Ok(event) = rx.recv().await {
//!     if let TransportEvent::Message(msg) = event {
//!         println!("{}", msg.event_name());
//!     }
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::protocol::{InboundMessage, OutboundMessage};

// ── Broadcast channel capacity ───────────────────────────────────────

/// Suggested capacity for the event channel handed to [`WebSocketHandle::connect`].
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── TransportEvent ───────────────────────────────────────────────────

/// Everything the transport reports to its subscribers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection attempt is starting. `attempt` is 0 for the first try
    /// after a successful connection (or at startup) and counts reconnects.
    Connecting { attempt: u32 },
    /// The WebSocket handshake completed.
    Connected,
    /// An established connection dropped.
    Disconnected { reason: String },
    /// Reconnection gave up; the transport task has exited.
    Failed { attempts: u32 },
    /// A decoded inbound message.
    Message(Arc<InboundMessage>),
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Bounded exponential backoff for reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Consecutive failed attempts tolerated before giving up. The counter
    /// resets on every successful connection. `0` disables reconnecting.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

// ── WebSocketHandle ──────────────────────────────────────────────────

/// Handle to a running transport task.
///
/// Call [`shutdown`](Self::shutdown) (or cancel the token passed to
/// [`connect`](Self::connect)) to close the socket and stop reconnecting.
#[derive(Debug)]
pub struct WebSocketHandle {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    events: broadcast::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl WebSocketHandle {
    /// Validate the endpoint and spawn the connect/reconnect loop.
    ///
    /// Returns as soon as the task is spawned; the first connection attempt
    /// happens asynchronously. The caller owns `events` so it can subscribe
    /// before the first event is published. Must be called from within a
    /// Tokio runtime.
    pub fn connect(
        url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
        events: broadcast::Sender<TransportEvent>,
    ) -> Result<Self, Error> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::UnsupportedScheme {
                    scheme: other.to_owned(),
                });
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let attempts = Arc::new(AtomicU32::new(0));

        let task = TransportTask {
            url,
            reconnect,
            cancel: cancel.clone(),
            events: events.clone(),
            connected: Arc::clone(&connected),
            attempts: Arc::clone(&attempts),
        };
        tokio::spawn(task.run(outbound_rx));

        Ok(Self {
            outbound: outbound_tx,
            events,
            connected,
            attempts,
            cancel,
        })
    }

    /// Queue a message for the server.
    ///
    /// Returns `false` without queueing when the transport is not connected.
    pub fn send(&self, message: OutboundMessage) -> bool {
        if !self.is_connected() {
            tracing::debug!(?message, "Not connected, dropping outbound message");
            return false;
        }
        self.outbound.send(message).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Consecutive reconnect attempts since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Get a new receiver for transport events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Signal the background task to close the socket and exit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

struct TransportTask {
    url: Url,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
    events: broadcast::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
}

impl TransportTask {
    /// Main loop: connect → read/write → on drop, backoff → reconnect.
    async fn run(self, mut outbound: mpsc::UnboundedReceiver<OutboundMessage>) {
        loop {
            let attempt = self.attempts.load(Ordering::Acquire);
            self.emit(TransportEvent::Connecting { attempt });

            let result = self.connect_and_serve(&mut outbound).await;
            let was_connected = self.connected.swap(false, Ordering::AcqRel);

            let reason = match result {
                Ok(reason) => reason,
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "WebSocket error");
                    e.to_string()
                }
            };
            if was_connected {
                self.emit(TransportEvent::Disconnected { reason });
            }

            if self.cancel.is_cancelled() {
                break;
            }

            let next = self.attempts.load(Ordering::Acquire) + 1;
            if next > self.reconnect.max_attempts {
                tracing::error!(
                    max_attempts = self.reconnect.max_attempts,
                    "WebSocket reconnection limit reached, giving up"
                );
                self.emit(TransportEvent::Failed {
                    attempts: self.reconnect.max_attempts,
                });
                break;
            }
            self.attempts.store(next, Ordering::Release);

            let delay = calculate_backoff(next - 1, &self.reconnect);
            tracing::info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = next,
                "Waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!("WebSocket loop exiting");
    }

    /// Establish one connection and serve it until it drops. Returns the
    /// close reason on an orderly end.
    async fn connect_and_serve(
        &self,
        outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> Result<String, Error> {
        tracing::info!(url = %self.url, "Connecting to WebSocket");

        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        let (ws_stream, _response) = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok("client shutdown".into()),
            result = connect => result.map_err(|e| Error::WebSocketConnect(e.to_string()))?,
        };

        // Anything queued against the previous connection is stale.
        while let Ok(stale) = outbound.try_recv() {
            tracing::debug!(?stale, "Discarding message queued before reconnect");
        }

        self.attempts.store(0, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        tracing::info!("WebSocket connected");
        self.emit(TransportEvent::Connected);

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok("client shutdown".into());
                }
                Some(message) = outbound.recv() => {
                    let text = match message.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, ?message, "Could not encode outbound message");
                            continue;
                        }
                    };
                    tracing::trace!(%text, "WebSocket send");
                    write
                        .send(tungstenite::Message::Text(text.into()))
                        .await
                        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            parse_and_broadcast(text.as_str(), &self.events);
                        }
                        Some(Ok(tungstenite::Message::Ping(_))) => {
                            tracing::trace!("WebSocket ping");
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            let Some(cf) = frame else {
                                tracing::info!("WebSocket close frame received (no payload)");
                                return Ok("server closed the connection".into());
                            };
                            tracing::info!(
                                code = u16::from(cf.code),
                                reason = cf.reason.as_str(),
                                "WebSocket close frame received"
                            );
                            return Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.as_str().to_owned(),
                            });
                        }
                        Some(Err(e)) => {
                            return Err(Error::WebSocketConnect(e.to_string()));
                        }
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Ok("stream ended".into());
                        }
                        _ => {
                            // Binary, Pong, Frame
                        }
                    }
                }
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Decode a text frame and broadcast it. Undecodable frames are logged and
/// dropped so that one bad frame never tears the connection down.
fn parse_and_broadcast(text: &str, events: &broadcast::Sender<TransportEvent>) {
    match InboundMessage::from_text(text) {
        Ok(message) => {
            tracing::trace!(event = message.event_name(), "WebSocket message");
            let _ = events.send(TransportEvent::Message(Arc::new(message)));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dropping undecodable WebSocket frame");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(31) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic spread seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 10);
    }

    #[test]
    fn backoff_increases_exponentially() {
        let config = ReconnectConfig::default();

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);

        assert!(d1 > d0, "d1 ({d1:?}) should be greater than d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should be greater than d1 ({d1:?})");
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
        };

        let d10 = calculate_backoff(10, &config);
        assert!(
            d10 <= Duration::from_millis(12_500),
            "delay at attempt 10 ({d10:?}) should be capped near max_delay"
        );
        // Huge attempt numbers must not overflow the exponent.
        assert!(calculate_backoff(u32::MAX, &config) <= Duration::from_millis(12_500));
    }

    #[test]
    fn parse_and_broadcast_known_event() {
        let (tx, mut rx) = broadcast::channel(16);

        let raw = serde_json::json!({
            "event": "command_result",
            "data": { "success": true, "command": "HOLD" }
        });
        parse_and_broadcast(&raw.to_string(), &tx);

        let TransportEvent::Message(msg) = rx.try_recv().unwrap() else {
            panic!("expected a message event");
        };
        assert_eq!(msg.event_name(), "command_result");
    }

    #[test]
    fn parse_and_broadcast_malformed_json() {
        let (tx, mut rx) = broadcast::channel::<TransportEvent>(16);

        parse_and_broadcast("not json at all", &tx);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejects_non_websocket_scheme() {
        let (tx, _rx) = broadcast::channel(16);
        let url = Url::parse("http://127.0.0.1:8082/").unwrap();

        let err = WebSocketHandle::connect(
            url,
            ReconnectConfig::default(),
            CancellationToken::new(),
            tx,
        )
        .unwrap_err();

        assert!(matches!(err, Error::UnsupportedScheme { ref scheme } if scheme == "http"));
    }
}
