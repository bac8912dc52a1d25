// ── Inbound message routing ──
//
// Translates decoded wire messages into store setters and tracker signals.
// Geometry arrives in three layouts; it is normalized to one candidate list
// and validated entry by entry, so a bad entry never costs the rest of the
// batch.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use atmlink_api::TransportEvent;
use atmlink_api::protocol::{
    ConnectionStatus, GeometryPayload, InboundMessage, InitialData, NodeInfo, RawShape,
    RouteData,
};

use crate::connection::{ConnectionTracker, DataKind, TransportState};
use crate::convert::{
    ShapeRejection, coordinates_of, is_line_tag, polygon_from_wire, polyline_from_wire,
};
use crate::model::{
    CommandOutcome, ContextTopology, EchoLine, EntitySet, Route, ServerStatus, Shape, ShapeKind,
    SimTick,
};
use crate::notification::Notifier;
use crate::store::AppStore;

// ── Geometry normalization ───────────────────────────────────────────

/// A geometry payload flattened to one list of candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryBatch {
    pub candidates: Vec<Value>,
    /// `true` for the dictionary layout, which lists every shape of its
    /// kind for the active context.
    pub complete: bool,
}

/// Flatten any of the three layouts. Dictionary keys become the entry's
/// `name` when the entry does not carry one.
pub fn normalize_geometry(payload: &GeometryPayload) -> GeometryBatch {
    match payload {
        GeometryPayload::Dict(entries) => GeometryBatch {
            candidates: entries
                .iter()
                .map(|(key, entry)| {
                    let mut entry = entry.clone();
                    if let Value::Object(map) = &mut entry {
                        let named = map
                            .get("name")
                            .and_then(Value::as_str)
                            .is_some_and(|n| !n.is_empty());
                        if !named {
                            map.insert("name".into(), Value::String(key.clone()));
                        }
                    }
                    entry
                })
                .collect(),
            complete: true,
        },
        GeometryPayload::Single(entry) => GeometryBatch {
            candidates: vec![entry.clone()],
            complete: false,
        },
        GeometryPayload::List(entries) => GeometryBatch {
            candidates: entries.clone(),
            complete: false,
        },
    }
}

/// Validate one candidate and convert it into a shape.
///
/// Requires an object with a non-empty name and non-empty, equal-length,
/// numeric `lat`/`lon` arrays (or an even-length flat `coordinates`
/// array). A `"LINE"` entry in a polygon message becomes a polyline.
pub fn validate_candidate(candidate: &Value, kind: ShapeKind) -> Result<Shape, ShapeRejection> {
    if !candidate.is_object() {
        return Err(ShapeRejection::NotAnObject);
    }
    let raw: RawShape = serde_json::from_value(candidate.clone())
        .map_err(|e| ShapeRejection::Malformed(e.to_string()))?;
    if raw.name.trim().is_empty() {
        return Err(ShapeRejection::MissingName);
    }
    coordinates_of(&raw)?;

    let shape = match kind {
        ShapeKind::Polygon if is_line_tag(raw.shape.as_deref()) => polyline_from_wire(&raw),
        ShapeKind::Polygon => polygon_from_wire(&raw),
        ShapeKind::Polyline => polyline_from_wire(&raw),
    };
    Ok(shape)
}

/// What one geometry message did to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryOutcome {
    pub applied: usize,
    pub skipped: usize,
    pub pruned: usize,
}

impl GeometryOutcome {
    fn changed(self) -> bool {
        self.applied > 0 || self.pruned > 0
    }
}

// ── Router ───────────────────────────────────────────────────────────

/// Feeds decoded messages and transport events into the store and tracker.
#[derive(Debug, Clone)]
pub struct Router {
    store: Arc<AppStore>,
    tracker: ConnectionTracker,
    notifier: Notifier,
    heartbeat_interval: Arc<watch::Sender<Duration>>,
}

impl Router {
    pub fn new(
        store: Arc<AppStore>,
        tracker: ConnectionTracker,
        notifier: Notifier,
        heartbeat_interval: Duration,
    ) -> Self {
        let (tx, _) = watch::channel(heartbeat_interval);
        Self {
            store,
            tracker,
            notifier,
            heartbeat_interval: Arc::new(tx),
        }
    }

    /// Keep-alive cadence, updated by `heartbeat_config` messages.
    pub fn heartbeat_interval(&self) -> watch::Receiver<Duration> {
        self.heartbeat_interval.subscribe()
    }

    // ── Transport events ─────────────────────────────────────────────

    pub fn handle_transport_event(&self, event: &TransportEvent) {
        match event {
            TransportEvent::Connecting { attempt } => {
                if *attempt > 0 {
                    info!(attempt, "reconnecting");
                }
                self.tracker.set_transport_state(TransportState::Connecting);
            }
            TransportEvent::Connected => self.tracker.set_transport_connected(true),
            TransportEvent::Disconnected { reason } => {
                debug!(%reason, "transport down");
                self.tracker.set_transport_connected(false);
            }
            TransportEvent::Failed { attempts } => {
                self.tracker.set_transport_state(TransportState::Error);
                self.notifier
                    .error(format!("Gave up reconnecting after {attempts} attempts"));
            }
            TransportEvent::Message(message) => self.dispatch(message),
        }
    }

    // ── Inbound dispatch ─────────────────────────────────────────────

    /// Apply one inbound message.
    pub fn dispatch(&self, message: &InboundMessage) {
        trace!(event = message.event_name(), "dispatch");
        match message {
            InboundMessage::InitialData(data) => self.apply_initial_data(data),
            InboundMessage::SimInfo(info) => self.apply_tick(SimTick::from(info.clone())),
            InboundMessage::Traffic(data) => self.apply_traffic(EntitySet::from(data.clone())),
            InboundMessage::NodeInfo(info) => self.apply_node_info(info),
            InboundMessage::Poly(payload) => {
                self.apply_geometry(ShapeKind::Polygon, payload, true);
            }
            InboundMessage::Polyline(payload) => {
                self.apply_geometry(ShapeKind::Polyline, payload, true);
            }
            InboundMessage::ConnectionStatus(status) => self.apply_connection_status(status),
            InboundMessage::ServerDisconnected(notice) => {
                let reason = notice.reason.as_deref().unwrap_or("server disconnected");
                self.store.set_server_status(ServerStatus::Stopped);
                self.tracker.on_negative_status(reason);
            }
            InboundMessage::Reset(notice) => self.apply_reset(notice.reason.as_deref()),
            InboundMessage::CommandCatalog(catalog) => {
                self.store.set_command_catalog(Some(catalog.cmddict.clone()));
            }
            InboundMessage::Echo(echo) => self.store.push_echo(EchoLine::from(echo.clone())),
            InboundMessage::CommandResult(result) => {
                self.store.set_command_result(CommandOutcome {
                    command: result.command.clone(),
                    success: result.success,
                    received_at: Utc::now(),
                });
                if result.success {
                    self.notifier.info(format!("Command succeeded: {}", result.command));
                } else {
                    self.notifier.error(format!("Command failed: {}", result.command));
                }
            }
            InboundMessage::HeartbeatConfig(config) => self.apply_heartbeat_config(config.interval),
            InboundMessage::HeartbeatAck => trace!("heartbeat acknowledged"),
            InboundMessage::RouteData(route) => self.apply_route(route),
            InboundMessage::SessionError(error) => {
                warn!(message = %error.message, "server session error");
                self.notifier.warn(if error.message.is_empty() {
                    "Session error".to_owned()
                } else {
                    format!("Session error: {}", error.message)
                });
            }
            InboundMessage::Unknown { event } => debug!(%event, "ignoring unknown event"),
        }
    }

    /// Full snapshot after connecting. Topology goes first so the active
    /// context is known before geometry is tagged with it; all geometry is
    /// applied quietly and published with one notification.
    fn apply_initial_data(&self, data: &InitialData) {
        if let Some(status) = &data.connection_status {
            self.apply_connection_status(status);
        }
        if let Some(info) = &data.node_info {
            self.apply_node_info(info);
        }
        if let Some(catalog) = &data.cmddict {
            self.store.set_command_catalog(Some(catalog.clone()));
        }
        if let Some(info) = &data.sim_data {
            self.apply_tick(SimTick::from(info.clone()));
        }
        if let Some(traffic) = &data.traffic_data {
            self.apply_traffic(EntitySet::from(traffic.clone()));
        }
        if let Some(echo) = &data.echo_data {
            self.store.push_echo(EchoLine::from(echo.clone()));
        }

        let mut changed = false;
        if let Some(polys) = &data.poly_data {
            changed |= self.apply_geometry(ShapeKind::Polygon, polys, false).changed();
        }
        if let Some(lines) = &data.polyline_data {
            changed |= self.apply_geometry(ShapeKind::Polyline, lines, false).changed();
        }
        if changed {
            self.store.shapes.notify();
        }
    }

    fn apply_tick(&self, tick: SimTick) {
        self.store.set_sim_info(Some(tick));
        self.tracker.on_data_signal(DataKind::Tick);
    }

    fn apply_traffic(&self, batch: EntitySet) {
        self.store.set_entity_batch(Some(batch));
        self.tracker.on_data_signal(DataKind::Entities);
    }

    /// Topology doubles as the heartbeat: it carries the active context and
    /// proves the simulation side is alive whenever it lists any context.
    fn apply_node_info(&self, info: &NodeInfo) {
        let alive = info.has_contexts();
        self.store.set_contexts(ContextTopology::from(info.clone()));
        if let Some(active) = info.active_node.as_deref().filter(|id| !id.is_empty()) {
            self.store.set_active_context(Some(active.to_owned()));
        }
        if alive {
            self.store.set_server_status(ServerStatus::Running);
            self.tracker.on_liveness_signal();
        }
    }

    /// Only a negative statement is acted on.
    fn apply_connection_status(&self, status: &ConnectionStatus) {
        if status.connected {
            trace!("ignoring positive connection_status");
        } else {
            self.tracker.on_negative_status("server reports no simulation connection");
        }
    }

    fn apply_reset(&self, reason: Option<&str>) {
        let active = self.store.active_context_id.get();
        let removed = self
            .store
            .shapes
            .retain_quiet(|s| s.context_id.is_some() && s.context_id != active);
        if removed > 0 {
            self.store.shapes.notify();
        }
        self.store.set_entity_batch(None);
        self.store.set_selected_entity(None);
        self.store.set_route(None);
        info!(context = ?active, removed, reason = ?reason, "simulation reset");
        self.notifier.info(match reason {
            Some(r) if !r.is_empty() => format!("Simulation reset: {r}"),
            _ => "Simulation reset".to_owned(),
        });
    }

    /// Routes only make sense for aircraft of the active context: without
    /// one, or for an aircraft missing from the current traffic, the route
    /// is dropped.
    fn apply_route(&self, data: &RouteData) {
        if data.acid.is_empty() {
            debug!("ignoring route without aircraft id");
            return;
        }
        if self.store.active_context_id.get().is_none() {
            debug!(acid = %data.acid, "ignoring route, no active context");
            return;
        }
        let known = self
            .store
            .entity_batch
            .get()
            .is_none_or(|batch| batch.get(&data.acid).is_some());
        if !known {
            debug!(acid = %data.acid, "ignoring route for aircraft not in traffic");
            return;
        }
        self.store.set_route(Some(Route::from(data.clone())));
    }

    fn apply_heartbeat_config(&self, interval_secs: f64) {
        if !interval_secs.is_finite() || interval_secs <= 0.0 {
            warn!(interval_secs, "ignoring invalid heartbeat interval");
            return;
        }
        let interval = Duration::from_secs_f64(interval_secs);
        debug!(interval_secs, "heartbeat interval updated");
        self.heartbeat_interval.send_replace(interval);
    }

    // ── Geometry ─────────────────────────────────────────────────────

    /// Validate and store one geometry message.
    ///
    /// Shapes are tagged with the active context. A complete (dictionary)
    /// payload also removes shapes of the same kind in that context that it
    /// no longer lists. With `notify` false the caller publishes.
    pub fn apply_geometry(
        &self,
        kind: ShapeKind,
        payload: &GeometryPayload,
        notify: bool,
    ) -> GeometryOutcome {
        let batch = normalize_geometry(payload);
        let context = self.store.active_context_id.get();
        let mut outcome = GeometryOutcome::default();
        let mut seen = BTreeSet::new();

        for candidate in &batch.candidates {
            match validate_candidate(candidate, kind) {
                Ok(mut shape) => {
                    shape.context_id.clone_from(&context);
                    seen.insert(shape.name.clone());
                    self.store.shapes.upsert_shape(shape, false);
                    outcome.applied += 1;
                }
                Err(reason) => {
                    let name = candidate.get("name").and_then(Value::as_str).unwrap_or("");
                    warn!(%kind, name, %reason, "skipping geometry entry");
                    // A listed but unreadable entry keeps its last good version.
                    if !name.is_empty() {
                        seen.insert(name.to_owned());
                    }
                    outcome.skipped += 1;
                }
            }
        }

        if batch.complete {
            outcome.pruned = self.store.shapes.retain_quiet(|s| {
                s.kind() != kind || s.context_id != context || seen.contains(&s.name)
            });
        }

        if notify && outcome.changed() {
            self.store.shapes.notify();
        }
        if outcome.applied > 0 {
            self.tracker.on_data_signal(DataKind::Geometry);
        }
        debug!(
            %kind,
            applied = outcome.applied,
            skipped = outcome.skipped,
            pruned = outcome.pruned,
            "geometry applied"
        );
        outcome
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::listener::Subscription;
    use crate::session::MemorySessionStore;

    fn router() -> (Router, Arc<AppStore>, ConnectionTracker) {
        let notifier = Notifier::new();
        let tracker = ConnectionTracker::new(Arc::new(MemorySessionStore::new()), notifier.clone());
        let store = Arc::new(AppStore::new());
        let router = Router::new(
            Arc::clone(&store),
            tracker.clone(),
            notifier,
            Duration::from_secs(5),
        );
        (router, store, tracker)
    }

    fn msg(event: &str, data: Value) -> InboundMessage {
        InboundMessage::from_text(&json!({ "event": event, "data": data }).to_string()).unwrap()
    }

    fn count_shape_notifications(store: &AppStore) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = store.shapes.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, sub)
    }

    #[test]
    fn normalizes_all_three_layouts() {
        let dict = GeometryPayload::from_value(json!({"polys": {"A": {"lat": [1.0], "lon": [2.0]}}}));
        let batch = normalize_geometry(&dict);
        assert!(batch.complete);
        assert_eq!(batch.candidates[0]["name"], "A");

        let single = GeometryPayload::from_value(json!({"name": "B", "lat": [1.0], "lon": [2.0]}));
        assert_eq!(normalize_geometry(&single).candidates.len(), 1);

        let list = GeometryPayload::from_value(json!([{"name": "C"}, {"name": "D"}]));
        let batch = normalize_geometry(&list);
        assert!(!batch.complete);
        assert_eq!(batch.candidates.len(), 2);
    }

    #[test]
    fn validate_rejects_bad_entries() {
        assert_eq!(
            validate_candidate(&json!(42), ShapeKind::Polygon),
            Err(ShapeRejection::NotAnObject)
        );
        assert_eq!(
            validate_candidate(&json!({"lat": [1.0], "lon": [1.0]}), ShapeKind::Polygon),
            Err(ShapeRejection::MissingName)
        );
        assert!(matches!(
            validate_candidate(&json!({"name": "x", "lat": "1", "lon": [1.0]}), ShapeKind::Polygon),
            Err(ShapeRejection::Malformed(_) | ShapeRejection::NotAnArray { .. })
        ));
    }

    #[test]
    fn line_tag_in_poly_becomes_polyline() {
        let shape = validate_candidate(
            &json!({"name": "RWY", "shape": "LINE", "coordinates": [52.0, 4.0, 52.1, 4.1]}),
            ShapeKind::Polygon,
        )
        .unwrap();
        assert_eq!(shape.kind(), ShapeKind::Polyline);
        assert_eq!(shape.geometry.coordinates().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bad_entry_does_not_discard_batch() {
        let (router, store, tracker) = router();
        tracker.set_transport_connected(true);
        let (hits, _sub) = count_shape_notifications(&store);

        router.dispatch(&msg(
            "poly",
            json!([
                {"name": "ok1", "lat": [1.0, 2.0], "lon": [3.0, 4.0]},
                {"name": "x", "lat": [1.0], "lon": []},
                {"name": "ok2", "lat": [5.0], "lon": [6.0]},
            ]),
        ));

        assert_eq!(store.shapes.names(), vec!["ok1".to_owned(), "ok2".to_owned()]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let snap = tracker.snapshot();
        assert!(snap.sim_connected);
        assert!(!snap.receiving_data);
    }

    #[tokio::test(start_paused = true)]
    async fn all_invalid_geometry_sends_no_signal() {
        let (router, store, tracker) = router();
        tracker.set_transport_connected(true);
        let (hits, _sub) = count_shape_notifications(&store);

        router.dispatch(&msg("polyline", json!({"name": "x", "lat": [1.0], "lon": []})));

        assert!(store.shapes.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!tracker.snapshot().sim_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn dictionary_replaces_shapes_of_its_kind() {
        let (router, store, _tracker) = router();
        router.dispatch(&msg(
            "poly",
            json!({"polys": {
                "A": {"lat": [1.0], "lon": [1.0]},
                "B": {"lat": [2.0], "lon": [2.0]},
            }}),
        ));
        router.dispatch(&msg("polyline", json!({"name": "L", "lat": [0.0, 1.0], "lon": [0.0, 1.0]})));

        router.dispatch(&msg("poly", json!({"polys": {"B": {"lat": [3.0], "lon": [3.0]}}})));

        assert_eq!(store.shapes.names(), vec!["B".to_owned(), "L".to_owned()]);
        assert_eq!(store.shapes.get("B").unwrap().geometry.coordinates(), &[[3.0, 3.0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn dictionary_keeps_last_good_version_of_malformed_entry() {
        let (router, store, _tracker) = router();
        router.dispatch(&msg(
            "poly",
            json!({"polys": {
                "A": {"lat": [1.0], "lon": [1.0]},
                "B": {"lat": [2.0], "lon": [2.0]},
            }}),
        ));

        router.dispatch(&msg(
            "poly",
            json!({"polys": {
                "A": {"lat": [1.0, 2.0], "lon": []},
                "C": {"lat": [4.0], "lon": [4.0]},
            }}),
        ));

        assert_eq!(store.shapes.names(), vec!["A".to_owned(), "C".to_owned()]);
        assert_eq!(store.shapes.get("A").unwrap().geometry.coordinates(), &[[1.0, 1.0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn route_follows_active_context_traffic() {
        let (router, store, _tracker) = router();
        let route = json!({"acid": "KL204", "iactwp": 0, "wplat": [52.0], "wplon": [4.5]});

        router.dispatch(&msg("routedata", route.clone()));
        assert!(store.route.get().is_none(), "no active context yet");

        store.set_active_context(Some("n1".into()));
        router.dispatch(&msg("acdata", json!({"id": ["BA12"], "lat": [51.0], "lon": [0.0]})));
        router.dispatch(&msg("routedata", route.clone()));
        assert!(store.route.get().is_none(), "aircraft not in traffic");

        router.dispatch(&msg("acdata", json!({"id": ["KL204"], "lat": [52.3], "lon": [4.76]})));
        router.dispatch(&msg("routedata", route));
        let stored = store.route.get().unwrap();
        assert_eq!(stored.aircraft_id, "KL204");
        assert_eq!(stored.active().unwrap().position, [52.0, 4.5]);

        router.dispatch(&msg("reset", json!({})));
        assert!(store.route.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn session_error_becomes_warning() {
        let (router, _store, tracker) = router();
        let mut notes = tracker.notifications();

        router.dispatch(&msg("session_error", json!({"message": "Session not found"})));

        let note = notes.try_recv().unwrap();
        assert_eq!(note.level, crate::notification::NotificationLevel::Warning);
        assert_eq!(note.message, "Session error: Session not found");
    }

    #[tokio::test(start_paused = true)]
    async fn initial_data_notifies_shapes_once() {
        let (router, store, tracker) = router();
        tracker.set_transport_connected(true);
        let (hits, _sub) = count_shape_notifications(&store);

        router.dispatch(&msg(
            "initial_data",
            json!({
                "sim_data": {"simt": 10.0, "ntraf": 1, "state": 2},
                "traffic_data": {"id": ["KL204"], "lat": [52.0], "lon": [4.0]},
                "cmddict": {"HOLD": "Pause"},
                "poly_data": {"polys": {
                    "P1": {"lat": [1.0], "lon": [1.0]},
                    "P2": {"lat": [2.0], "lon": [2.0]},
                }},
                "polyline_data": {"polys": {"L1": {"lat": [0.0, 1.0], "lon": [0.0, 1.0]}}},
                "echo_data": {},
            }),
        ));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.shapes.len(), 3);
        let snap = store.snapshot();
        assert!(snap.sim_info.is_some());
        assert_eq!(snap.entity_batch.unwrap().len(), 1);
        assert!(snap.command_catalog.unwrap().contains_key("HOLD"));
        assert!(tracker.snapshot().receiving_data);
    }

    #[tokio::test(start_paused = true)]
    async fn node_info_switches_context_through_store() {
        let (router, store, tracker) = router();
        tracker.set_transport_connected(true);
        let nodes = |active: &str| {
            msg(
                "node_info",
                json!({
                    "nodes": {"A": {"node_num": 1}, "B": {"node_num": 2}},
                    "servers": {"srv": {}},
                    "active_node": active,
                }),
            )
        };

        router.dispatch(&nodes("A"));
        router.dispatch(&msg("poly", json!({"name": "Z", "lat": [1.0], "lon": [1.0]})));
        assert_eq!(store.shapes.get("Z").unwrap().context_id.as_deref(), Some("A"));

        router.dispatch(&nodes("B"));

        assert!(store.shapes.is_empty());
        assert_eq!(store.active_context_id.get().as_deref(), Some("B"));
        assert_eq!(store.contexts.get().len(), 2);
        assert_eq!(store.server_status.get(), ServerStatus::Running);
        assert!(tracker.snapshot().sim_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn positive_connection_status_is_not_trusted() {
        let (router, _store, tracker) = router();
        tracker.set_transport_connected(true);

        router.dispatch(&msg("connection_status", json!({"connected": true})));
        assert!(!tracker.snapshot().sim_connected);

        router.dispatch(&msg("siminfo", json!({"simt": 1.0})));
        assert!(tracker.snapshot().sim_connected);

        router.dispatch(&msg("connection_status", json!({"connected": false})));
        assert!(!tracker.snapshot().sim_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_active_context_shapes() {
        let (router, store, _tracker) = router();
        router.dispatch(&msg(
            "node_info",
            json!({"nodes": {"A": {}}, "active_node": "A"}),
        ));
        router.dispatch(&msg("poly", json!({"name": "mine", "lat": [1.0], "lon": [1.0]})));
        store.shapes.upsert_shape(
            Shape::polygon("other", vec![[0.0, 0.0]]).with_context("B"),
            true,
        );
        router.dispatch(&msg("acdata", json!({"id": ["KL204"], "lat": [1.0], "lon": [1.0]})));

        router.dispatch(&msg("reset", json!({"reason": "operator"})));

        assert_eq!(store.shapes.names(), vec!["other".to_owned()]);
        assert!(store.entity_batch.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_config_updates_interval() {
        let (router, _store, _tracker) = router();
        let rx = router.heartbeat_interval();

        router.dispatch(&msg("heartbeat_config", json!({"interval": 2.5})));
        assert_eq!(*rx.borrow(), Duration::from_millis(2500));

        router.dispatch(&msg("heartbeat_config", json!({"interval": 0})));
        assert_eq!(*rx.borrow(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn command_result_is_recorded() {
        let (router, store, _tracker) = router();

        router.dispatch(&msg("command_result", json!({"success": true, "command": "HOLD"})));
        let first = store.last_command_result.get().unwrap();
        assert!(first.success);
        assert_eq!(first.command, "HOLD");

        router.dispatch(&msg("command_result", json!({"success": false, "command": "CRE"})));
        let second = store.last_command_result.get().unwrap();
        assert!(!second.success);
        assert_eq!(second.command, "CRE");
    }

    #[tokio::test(start_paused = true)]
    async fn transport_events_drive_tracker() {
        let (router, _store, tracker) = router();

        router.handle_transport_event(&TransportEvent::Connecting { attempt: 0 });
        assert_eq!(tracker.snapshot().transport_state, TransportState::Connecting);

        router.handle_transport_event(&TransportEvent::Connected);
        router.dispatch(&msg("siminfo", json!({})));
        assert!(tracker.snapshot().sim_connected);

        router.handle_transport_event(&TransportEvent::Disconnected {
            reason: "gone".into(),
        });
        let snap = tracker.snapshot();
        assert!(!snap.transport_connected);
        assert!(!snap.sim_connected);

        router.handle_transport_event(&TransportEvent::Failed { attempts: 10 });
        assert_eq!(tracker.snapshot().transport_state, TransportState::Error);
    }
}
