// ── Client facade ──
//
// Full lifecycle management for one simulation server connection. Owns the
// connection tracker, the application store and the router, runs the
// transport plus its background tasks, and exposes the outbound intents.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use atmlink_api::websocket::EVENT_CHANNEL_CAPACITY;
use atmlink_api::{OutboundMessage, TransportEvent, WebSocketHandle};

use crate::config::ClientConfig;
use crate::connection::{ConnectionSnapshot, ConnectionTracker, TransportState};
use crate::error::CoreError;
use crate::listener::Subscription;
use crate::notification::{Notification, Notifier};
use crate::router::Router;
use crate::session::{MemorySessionStore, SessionStore};
use crate::store::AppStore;
use crate::stream::ShapeStream;

const NOT_CONNECTED_NOTICE: &str =
    "No simulation is connected. Start one on the server or select a context.";

/// One live transport plus the token that stops it.
struct Session {
    handle: Arc<WebSocketHandle>,
    cancel: CancellationToken,
}

// ── Client ───────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ClientInner>`. Construction wires the
/// tracker into the store (connection mirror flags, reset on simulation
/// loss); [`connect`](Self::connect) starts the transport.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    store: Arc<AppStore>,
    tracker: ConnectionTracker,
    router: Router,
    notifier: Notifier,
    session: ArcSwapOption<Session>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    _wiring: Vec<Subscription>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.swap(None) {
            session.cancel.cancel();
        }
        self.tracker.shutdown();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.config.url.as_str())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with an in-process session store. Does NOT connect.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_session_store(config, Arc::new(MemorySessionStore::new()))
    }

    /// Create a client whose "initial check performed" flag lives in
    /// `session`.
    pub fn with_session_store(config: ClientConfig, session: Arc<dyn SessionStore>) -> Self {
        let notifier = Notifier::new();
        let store = Arc::new(AppStore::new());
        let tracker = ConnectionTracker::new(session, notifier.clone());
        tracker.set_server_address(config.server_address.clone());
        let router = Router::new(
            Arc::clone(&store),
            tracker.clone(),
            notifier.clone(),
            config.heartbeat_interval,
        );

        let mirror = {
            let store = Arc::clone(&store);
            tracker.subscribe(move |snap| store.mirror_connection(snap))
        };
        let reset_on_loss = {
            let store = Arc::clone(&store);
            tracker.on_disconnect(move || {
                debug!("simulation lost, resetting store");
                store.reset();
            })
        };

        Self {
            inner: Arc::new(ClientInner {
                config,
                store,
                tracker,
                router,
                notifier,
                session: ArcSwapOption::empty(),
                task_handles: Mutex::new(Vec::new()),
                _wiring: vec![mirror, reset_on_loss],
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<AppStore> {
        &self.inner.store
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.inner.tracker
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start the transport and its background tasks.
    ///
    /// Returns once the tasks are running; the socket connects (and
    /// reconnects) in the background. Use
    /// [`wait_for_transport`](Self::wait_for_transport) to block until it
    /// is up. Calling this while already connected is a no-op; after the
    /// transport gave up it starts a fresh lifecycle.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let mut handles = self.inner.task_handles.lock().await;
        if let Some(session) = self.inner.session.load_full() {
            if !session.cancel.is_cancelled() {
                debug!("already connected");
                return Ok(());
            }
            debug!("previous transport finished, starting over");
            self.inner.session.store(None);
            for handle in handles.drain(..) {
                let _ = handle.await;
            }
        }

        let config = &self.inner.config;
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let handle = Arc::new(WebSocketHandle::connect(
            config.url.clone(),
            config.reconnect.clone(),
            cancel.clone(),
            events_tx,
        )?);

        self.inner.tracker.set_sim_connecting();

        handles.push(tokio::spawn(dispatch_task(
            self.inner.router.clone(),
            Arc::clone(&handle),
            events_rx,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(keepalive_task(
            Arc::clone(&handle),
            self.inner.router.heartbeat_interval(),
            cancel.clone(),
        )));

        self.inner.session.store(Some(Arc::new(Session { handle, cancel })));

        let notifier = self.inner.notifier.clone();
        self.inner.tracker.start_initial_connection_check(move || {
            warn!("no simulation connected after startup");
            notifier.warn(NOT_CONNECTED_NOTICE);
        });

        info!(url = %config.url, "client started");
        Ok(())
    }

    /// Close the socket and stop all background tasks.
    pub async fn disconnect(&self) {
        let Some(session) = self.inner.session.swap(None) else {
            return;
        };
        session.handle.shutdown();
        session.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.tracker.set_transport_state(TransportState::Disconnected);
        debug!("disconnected");
    }

    /// Connect, run `f`, then disconnect regardless of its outcome.
    pub async fn oneshot<F, Fut, T>(config: ClientConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let client = Client::new(config);
        client.connect().await?;
        let result = f(client.clone()).await;
        client.disconnect().await;
        result
    }

    /// Wait until the transport is up.
    ///
    /// Fails early if the transport gave up reconnecting.
    pub async fn wait_for_transport(&self, timeout: Duration) -> Result<(), CoreError> {
        self.wait_until(timeout, |snap| snap.transport_connected).await
    }

    /// Wait until a qualifying signal proves the simulation is connected.
    pub async fn wait_for_sim(&self, timeout: Duration) -> Result<(), CoreError> {
        self.wait_until(timeout, |snap| snap.sim_connected).await
    }

    async fn wait_until(
        &self,
        timeout: Duration,
        done: impl Fn(&ConnectionSnapshot) -> bool,
    ) -> Result<(), CoreError> {
        let mut rx = self.inner.tracker.watch();
        let url = self.inner.config.url.to_string();
        let wait = async {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    if done(&snap) {
                        return Ok(());
                    }
                    if snap.transport_state == TransportState::Error {
                        return Err(CoreError::ConnectionFailed {
                            url: url.clone(),
                            reason: "gave up reconnecting".into(),
                        });
                    }
                }
                if rx.changed().await.is_err() {
                    return Err(CoreError::Disconnected);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
    }

    // ── Outbound intents ─────────────────────────────────────────────

    /// Send a free-text stack command.
    ///
    /// Returns `false` without sending when the transport is down or the
    /// command is blank. Never waits for the server.
    pub fn send_command(&self, text: &str) -> bool {
        let command = text.trim();
        if command.is_empty() {
            debug!("refusing to send blank command");
            return false;
        }
        self.send(OutboundMessage::Command {
            command: command.to_owned(),
        })
    }

    /// Ask the server to switch to another context. The store follows once
    /// the server confirms through `node_info`.
    pub fn set_active_context(&self, id: &str) -> bool {
        self.send(OutboundMessage::SetActiveNode {
            node_id: id.to_owned(),
        })
    }

    /// Ask the server to re-send the context topology.
    pub fn list_contexts(&self) -> bool {
        self.send(OutboundMessage::GetNodes)
    }

    /// Ask the server to start `count` more contexts.
    pub fn add_contexts(&self, count: u32, server_id: Option<String>) -> bool {
        self.send(OutboundMessage::AddNodes { count, server_id })
    }

    fn send(&self, message: OutboundMessage) -> bool {
        match self.inner.session.load().as_ref() {
            Some(session) => session.handle.send(message),
            None => false,
        }
    }

    // ── State observation ────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.inner
            .session
            .load()
            .as_ref()
            .is_some_and(|s| s.handle.is_connected())
    }

    /// Consecutive failed reconnects, for diagnostics.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner
            .session
            .load()
            .as_ref()
            .map_or(0, |s| s.handle.reconnect_attempts())
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.tracker.watch()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    pub fn shapes(&self) -> ShapeStream {
        self.inner.store.shapes.stream()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Route transport events into the tracker and store until cancelled or
/// the transport gives up. Giving up cancels the session token, which stops
/// the keep-alive and marks the session finished for the next `connect`.
async fn dispatch_task(
    router: Router,
    handle: Arc<WebSocketHandle>,
    mut events: broadcast::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    router.handle_transport_event(&event);
                    match event {
                        TransportEvent::Connected => {
                            handle.send(OutboundMessage::GetNodes);
                        }
                        TransportEvent::Failed { .. } => {
                            cancel.cancel();
                            break;
                        }
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "dispatch fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("dispatch task exited");
}

/// Send a keep-alive at the current interval while connected.
async fn keepalive_task(
    handle: Arc<WebSocketHandle>,
    mut interval: watch::Receiver<Duration>,
    cancel: CancellationToken,
) {
    loop {
        let period = *interval.borrow_and_update();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = interval.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!("keep-alive interval changed");
            }
            () = tokio::time::sleep(period) => {
                if handle.is_connected() {
                    handle.send(OutboundMessage::Heartbeat);
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use url::Url;

    use super::*;
    use crate::connection::SimLinkState;

    fn config() -> ClientConfig {
        ClientConfig::new(Url::parse("ws://127.0.0.1:9/ws").unwrap())
    }

    #[tokio::test]
    async fn intents_fail_before_connect() {
        let client = Client::new(config());
        assert!(!client.send_command("HOLD"));
        assert!(!client.set_active_context("n1"));
        assert!(!client.list_contexts());
        assert!(!client.add_contexts(1, None));
        assert!(!client.is_connected());
        assert_eq!(client.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn rejects_non_websocket_url() {
        let client = Client::new(ClientConfig::new(Url::parse("http://localhost/").unwrap()));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn store_mirrors_tracker() {
        let client = Client::new(config());
        client.tracker().set_transport_connected(true);
        client.tracker().on_liveness_signal();

        let snap = client.store().snapshot();
        assert!(snap.transport_connected);
        assert!(snap.sim_connected);
        assert!(!snap.receiving_data);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_transport_times_out() {
        let client = Client::new(config());
        let err = client
            .wait_for_transport(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout { .. }));
    }

    fn closed_port_config(max_attempts: u32) -> ClientConfig {
        let mut config = config();
        config.reconnect.max_attempts = max_attempts;
        config.reconnect.initial_delay = Duration::from_millis(10);
        config.reconnect.max_delay = Duration::from_millis(10);
        config
    }

    #[tokio::test]
    async fn connect_marks_sim_connecting_while_attempting() {
        let client = Client::new(closed_port_config(1000));
        client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = client.tracker().snapshot();
        assert_eq!(snap.sim_state, SimLinkState::Connecting);
        assert_ne!(snap.transport_state, TransportState::Connected);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_while_connecting_resets_transport_state() {
        let client = Client::new(closed_port_config(1000));
        client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.disconnect().await;

        let snap = client.tracker().snapshot();
        assert_eq!(snap.transport_state, TransportState::Disconnected);
        assert_eq!(snap.sim_state, SimLinkState::Disconnected);
    }

    async fn next_give_up(notes: &mut broadcast::Receiver<Notification>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let note = notes.recv().await.unwrap();
                if note.message.starts_with("Gave up reconnecting") {
                    return;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn connect_after_give_up_starts_again() {
        let client = Client::new(closed_port_config(0));
        let mut notes = client.notifications();

        client.connect().await.unwrap();
        next_give_up(&mut notes).await;
        assert_eq!(client.tracker().snapshot().transport_state, TransportState::Error);

        // The dispatch task marks the session finished right after routing
        // the give-up.
        for _ in 0..100 {
            let finished = client
                .inner
                .session
                .load()
                .as_ref()
                .is_some_and(|s| s.cancel.is_cancelled());
            if finished {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        client.connect().await.unwrap();
        next_give_up(&mut notes).await;

        client.disconnect().await;
        assert_eq!(
            client.tracker().snapshot().transport_state,
            TransportState::Disconnected
        );
    }

    #[tokio::test]
    async fn wait_for_transport_fails_fast_on_give_up() {
        let client = Client::new(config());
        client.tracker().set_transport_state(TransportState::Error);
        let err = client
            .wait_for_transport(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    }
}
