// ── Connection status tracker ──
//
// Two coupled layers: the transport (the WebSocket itself, observed
// directly) and the simulation link behind it, which has no explicit
// "connected" signal and is inferred from the cadence of data messages.
//
// Invariants:
//   - transport down ⇒ simulation down, applied in the same update
//   - the simulation layer only comes up on a liveness or data signal
//   - it only goes down on the transport cascade, the data timeout, or an
//     explicit negative status from the server
//
// All operations are synchronous and never fail. The data timeout and the
// initial-load check are the only deferred work; each is a spawned Tokio
// task that is aborted and replaced on re-arm, with a generation counter
// so a timer that already fired cannot act on a newer arming.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use strum::{Display, EnumString};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DATA_TIMEOUT, INITIAL_CHECK_DELAY};
use crate::listener::{ListenerSet, Subscription, invoke_guarded};
use crate::notification::{Notification, NotificationLevel, Notifier};
use crate::session::{INITIAL_CHECK_FLAG, SessionStore};

pub const STATUS_SERVER_DISCONNECTED: &str = "Disconnected from server";
pub const STATUS_SIM_DISCONNECTED: &str = "Connected to server, simulation not connected";
pub const STATUS_RECEIVING: &str = "Connected to simulation, receiving data";
pub const STATUS_WAITING_FOR_DATA: &str = "Connected to simulation, waiting for data";

const EXCELLENT_BELOW: Duration = Duration::from_millis(1000);
const GOOD_BELOW: Duration = Duration::from_millis(2000);

// ── State enums ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SimLinkState {
    #[default]
    Disconnected,
    /// Advisory: a user-initiated connect is in flight.
    Connecting,
    Connected,
}

/// Which kind of data message produced a data signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DataKind {
    Tick,
    Entities,
    /// Proves the simulation is alive, but not that it is streaming.
    Geometry,
}

impl DataKind {
    fn implies_receiving(self) -> bool {
        !matches!(self, Self::Geometry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Unknown,
    Excellent,
    Good,
    Poor,
}

impl ConnectionQuality {
    /// Map the time between liveness signals to a quality bucket.
    pub fn from_interval(interval: Option<Duration>) -> Self {
        match interval {
            None => Self::Unknown,
            Some(d) if d < EXCELLENT_BELOW => Self::Excellent,
            Some(d) if d < GOOD_BELOW => Self::Good,
            Some(_) => Self::Poor,
        }
    }
}

// ── ConnectionSnapshot ───────────────────────────────────────────────

/// Immutable copy of the tracker state handed to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub transport_connected: bool,
    pub transport_state: TransportState,
    pub sim_connected: bool,
    pub sim_state: SimLinkState,
    pub receiving_data: bool,
    pub last_data_at: Option<Instant>,
    pub last_liveness_at: Option<Instant>,
    pub server_address: String,
    /// Time between the two most recent liveness signals.
    pub liveness_interval: Option<Duration>,
}

impl ConnectionSnapshot {
    pub fn quality(&self) -> ConnectionQuality {
        ConnectionQuality::from_interval(self.liveness_interval)
    }

    pub fn status_message(&self) -> &'static str {
        match (self.transport_connected, self.sim_connected, self.receiving_data) {
            (false, _, _) => STATUS_SERVER_DISCONNECTED,
            (true, false, _) => STATUS_SIM_DISCONNECTED,
            (true, true, true) => STATUS_RECEIVING,
            (true, true, false) => STATUS_WAITING_FOR_DATA,
        }
    }

    fn drop_sim(&mut self) -> bool {
        let was = self.sim_connected;
        self.sim_connected = false;
        self.sim_state = SimLinkState::Disconnected;
        self.receiving_data = false;
        was
    }
}

// ── Tracker internals ────────────────────────────────────────────────

pub type SnapshotListener = dyn Fn(&ConnectionSnapshot) + Send + Sync;
pub type DisconnectListener = dyn Fn() + Send + Sync;

#[derive(Default)]
struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    /// Abort any pending timer and return the generation for the next one.
    fn rearm(&mut self) -> u64 {
        self.cancel();
        self.generation += 1;
        self.generation
    }

    fn cancel(&mut self) -> bool {
        self.handle.take().is_some_and(|h| {
            h.abort();
            true
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }
}

struct TrackerState {
    snap: ConnectionSnapshot,
    data_timer: TimerSlot,
    initial_timer: TimerSlot,
    initial_check_sub: Option<Subscription>,
    initial_window_complete: bool,
}

/// What an update needs to publish once the state lock is released.
#[derive(Default)]
struct Effects {
    changed: bool,
    sim_lost: bool,
    notices: Vec<(NotificationLevel, String)>,
}

struct TrackerInner {
    state: Mutex<TrackerState>,
    watch: watch::Sender<ConnectionSnapshot>,
    listeners: ListenerSet<SnapshotListener>,
    disconnect_listeners: ListenerSet<DisconnectListener>,
    notifier: Notifier,
    session: Arc<dyn SessionStore>,
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.data_timer.cancel();
        state.initial_timer.cancel();
    }
}

// ── ConnectionTracker ────────────────────────────────────────────────

/// Owns the two-layer connection state machine.
///
/// Cheaply cloneable; clones share state. Timers need a Tokio runtime;
/// outside one they are skipped with a warning.
#[derive(Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl ConnectionTracker {
    pub fn new(session: Arc<dyn SessionStore>, notifier: Notifier) -> Self {
        // A check already performed earlier in this session means the
        // initial-load window is long over.
        let already_checked = session.get_flag(INITIAL_CHECK_FLAG);
        let (watch, _) = watch::channel(ConnectionSnapshot::default());

        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(TrackerState {
                    snap: ConnectionSnapshot::default(),
                    data_timer: TimerSlot::default(),
                    initial_timer: TimerSlot::default(),
                    initial_check_sub: None,
                    initial_window_complete: already_checked,
                }),
                watch,
                listeners: ListenerSet::new(),
                disconnect_listeners: ListenerSet::new(),
                notifier,
                session,
            }),
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.lock().snap.clone()
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.lock().snap.quality()
    }

    pub fn status_message(&self) -> &'static str {
        self.lock().snap.status_message()
    }

    /// Watch channel carrying every published snapshot.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.watch.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    /// Register a listener. It is called immediately with the current
    /// snapshot, then after every change.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ConnectionSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let listener: Arc<SnapshotListener> = Arc::new(listener);
        let sub = self.inner.listeners.add(Arc::clone(&listener));
        let current = self.snapshot();
        invoke_guarded("connection", || listener(&current));
        sub
    }

    /// Register a callback for the simulation layer going from connected to
    /// disconnected. Suppressed until the initial-load window has completed.
    pub fn on_disconnect(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.disconnect_listeners.add(Arc::new(callback))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len() + self.inner.disconnect_listeners.len()
    }

    // ── Transport layer ──────────────────────────────────────────────

    /// Record whether the transport is up. Going down forces the simulation
    /// layer down with it. Setting the current value again is a no-op.
    pub fn set_transport_connected(&self, connected: bool) {
        let state = if connected {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        };
        self.update(|st, fx| {
            if st.snap.transport_connected != connected {
                apply_transport_state(st, fx, state);
            }
        });
    }

    /// Drive the transport state machine, including the `connecting` and
    /// `error` states the boolean setter cannot express.
    pub fn set_transport_state(&self, state: TransportState) {
        self.update(|st, fx| {
            if st.snap.transport_state != state {
                apply_transport_state(st, fx, state);
            }
        });
    }

    pub fn set_server_address(&self, address: impl Into<String>) {
        let address = address.into();
        self.update(|st, fx| {
            if st.snap.server_address != address {
                st.snap.server_address = address;
                fx.changed = true;
            }
        });
    }

    // ── Simulation layer ─────────────────────────────────────────────

    /// Mark a user-initiated connect as in flight. Advisory only.
    pub fn set_sim_connecting(&self) {
        self.update(|st, fx| {
            if !st.snap.sim_connected && st.snap.sim_state != SimLinkState::Connecting {
                st.snap.sim_state = SimLinkState::Connecting;
                fx.changed = true;
            }
        });
    }

    /// A heartbeat-class message arrived.
    pub fn on_liveness_signal(&self) {
        self.update(|st, fx| {
            let now = Instant::now();
            if let Some(prev) = st.snap.last_liveness_at {
                let interval = now.saturating_duration_since(prev);
                st.snap.liveness_interval = Some(interval);
                debug!(
                    interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                    "liveness interval"
                );
            }
            st.snap.last_liveness_at = Some(now);
            fx.changed = true;

            bring_sim_up(st, fx);
            self.arm_data_timer(st);
        });
    }

    /// A tick, entity batch or geometry batch arrived.
    pub fn on_data_signal(&self, kind: DataKind) {
        self.update(|st, fx| {
            st.snap.last_data_at = Some(Instant::now());
            fx.changed = true;

            bring_sim_up(st, fx);
            if kind.implies_receiving() && st.snap.sim_connected && !st.snap.receiving_data {
                st.snap.receiving_data = true;
                debug!(%kind, "receiving simulation data");
            }
            self.arm_data_timer(st);
        });
    }

    /// The server stated explicitly that the simulation is not connected.
    /// Positive statements are never trusted; only data proves a link.
    pub fn on_negative_status(&self, reason: &str) {
        self.update(|st, fx| {
            st.data_timer.cancel();
            if st.snap.drop_sim() {
                warn!(reason, "server reports simulation disconnected");
                fx.changed = true;
                fx.sim_lost = true;
                fx.notices.push((
                    NotificationLevel::Warning,
                    format!("Simulation disconnected: {reason}"),
                ));
            }
        });
    }

    // ── Initial-load check ───────────────────────────────────────────

    /// Report "never connected" once per session if no simulation link
    /// shows up within the initial grace period.
    ///
    /// No-op if a check already ran in this session (per the session
    /// store). The flag is persisted before the timer is armed so a
    /// rebuilt tracker does not repeat the check.
    pub fn start_initial_connection_check(&self, on_not_connected: impl FnOnce() + Send + 'static) {
        if self.inner.session.get_flag(INITIAL_CHECK_FLAG) {
            debug!("initial connection check already performed this session");
            self.lock().initial_window_complete = true;
            return;
        }
        self.inner.session.set_flag(INITIAL_CHECK_FLAG, true);

        let Ok(runtime) = Handle::try_current() else {
            warn!("no Tokio runtime; initial connection check skipped");
            self.lock().initial_window_complete = true;
            return;
        };

        {
            let mut st = self.lock();
            let generation = st.initial_timer.rearm();
            let weak = Arc::downgrade(&self.inner);
            st.initial_timer.handle = Some(runtime.spawn(async move {
                tokio::time::sleep(INITIAL_CHECK_DELAY).await;
                if let Some(tracker) = upgrade(&weak) {
                    tracker.finish_initial_check(generation, on_not_connected);
                }
            }));
        }

        // Cancel early as soon as the simulation shows up.
        let weak = Arc::downgrade(&self.inner);
        let sub = self.subscribe(move |snap| {
            if snap.sim_connected {
                if let Some(tracker) = upgrade(&weak) {
                    tracker.cancel_initial_check();
                }
            }
        });

        let mut st = self.lock();
        if st.initial_timer.handle.is_some() {
            st.initial_check_sub = Some(sub);
        } else {
            drop(st);
            sub.unsubscribe();
        }
    }

    fn finish_initial_check(&self, generation: u64, on_not_connected: impl FnOnce()) {
        let (connected, sub) = {
            let mut st = self.lock();
            if !st.initial_timer.is_current(generation) {
                return;
            }
            st.initial_timer.handle = None;
            st.initial_window_complete = true;
            (st.snap.sim_connected, st.initial_check_sub.take())
        };
        if let Some(sub) = sub {
            sub.unsubscribe();
        }

        if connected {
            debug!("simulation connected during initial load");
        } else {
            info!("no simulation connection after initial load");
            invoke_guarded("initial-check", on_not_connected);
        }
    }

    fn cancel_initial_check(&self) {
        let sub = {
            let mut st = self.lock();
            if !st.initial_timer.cancel() {
                return;
            }
            st.initial_window_complete = true;
            st.initial_check_sub.take()
        };
        debug!("initial connection check cancelled by connection");
        if let Some(sub) = sub {
            sub.unsubscribe();
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Cancel both timers. State and listeners are left untouched.
    pub fn shutdown(&self) {
        let sub = {
            let mut st = self.lock();
            st.data_timer.cancel();
            st.initial_timer.cancel();
            st.initial_check_sub.take()
        };
        if let Some(sub) = sub {
            sub.unsubscribe();
        }
    }

    // ── Data timeout ─────────────────────────────────────────────────

    fn arm_data_timer(&self, st: &mut TrackerState) {
        let generation = st.data_timer.rearm();
        let Ok(runtime) = Handle::try_current() else {
            debug!("no Tokio runtime; data timeout not armed");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        st.data_timer.handle = Some(runtime.spawn(async move {
            tokio::time::sleep(DATA_TIMEOUT).await;
            if let Some(tracker) = upgrade(&weak) {
                tracker.on_data_timeout(generation);
            }
        }));
    }

    fn on_data_timeout(&self, generation: u64) {
        self.update(|st, fx| {
            if !st.data_timer.is_current(generation) {
                return;
            }
            st.data_timer.handle = None;
            if st.snap.drop_sim() {
                warn!(
                    timeout_ms = u64::try_from(DATA_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
                    "no simulation data within timeout"
                );
                fx.changed = true;
                fx.sim_lost = true;
                fx.notices.push((
                    NotificationLevel::Warning,
                    "No data from the simulation; connection lost".into(),
                ));
            }
        });
    }

    // ── Update / publish ─────────────────────────────────────────────

    /// Mutate under the lock, then publish outside it so listeners may call
    /// back into the tracker.
    ///
    /// Each listener is handed the state current at the time of its call,
    /// not the state this update produced. Concurrent or nested updates
    /// can interleave their notifications, and the last call a listener
    /// sees is then still the newest state.
    fn update(&self, f: impl FnOnce(&mut TrackerState, &mut Effects)) {
        let mut fx = Effects::default();
        let fire_disconnect = {
            let mut st = self.lock();
            let before = st.snap.clone();
            f(&mut st, &mut fx);
            fx.changed = fx.changed && st.snap != before;
            if fx.changed {
                self.inner.watch.send_replace(st.snap.clone());
            }
            fx.sim_lost && st.initial_window_complete
        };

        if fx.changed {
            self.inner
                .listeners
                .notify("connection", |l| l(&self.snapshot()));
        }
        if fire_disconnect {
            self.inner.disconnect_listeners.notify("disconnect", |l| l());
        } else if fx.sim_lost {
            debug!("simulation lost during initial-load window; disconnect callbacks suppressed");
        }
        for (level, message) in fx.notices {
            self.inner.notifier.notify(level, message);
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn upgrade(weak: &Weak<TrackerInner>) -> Option<ConnectionTracker> {
    weak.upgrade().map(|inner| ConnectionTracker { inner })
}

fn apply_transport_state(st: &mut TrackerState, fx: &mut Effects, state: TransportState) {
    let was_connected = st.snap.transport_connected;
    let connected = state == TransportState::Connected;

    st.snap.transport_state = state;
    st.snap.transport_connected = connected;
    fx.changed = true;

    if connected && !was_connected {
        info!(server = %st.snap.server_address, "transport connected");
        fx.notices
            .push((NotificationLevel::Info, format!("Connected to server {}", st.snap.server_address)));
    } else if !connected && was_connected {
        info!(%state, "transport disconnected");
        fx.notices
            .push((NotificationLevel::Warning, "Disconnected from server".into()));
    }

    if !connected {
        st.data_timer.cancel();
        // A first attempt (or a retry) with no simulation link yet keeps the
        // advisory `connecting` marker.
        let keep_advisory = state == TransportState::Connecting
            && !st.snap.sim_connected
            && st.snap.sim_state == SimLinkState::Connecting;
        if !keep_advisory {
            fx.sim_lost |= st.snap.drop_sim();
        }
    }
}

fn bring_sim_up(st: &mut TrackerState, fx: &mut Effects) {
    if st.snap.sim_connected {
        return;
    }
    if !st.snap.transport_connected {
        debug!("signal while transport is down; simulation state unchanged");
        return;
    }
    st.snap.sim_connected = true;
    st.snap.sim_state = SimLinkState::Connected;
    info!("simulation connected");
    fx.notices
        .push((NotificationLevel::Info, "Simulation connected".into()));
}

// ── Tests ────────────────────────────────────────────────────────────
