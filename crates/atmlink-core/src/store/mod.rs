// ── Reactive application store ──
//
// Single source of truth for everything the router learns from the
// server. Every field is individually observable; listeners receive
// `(new, old)` and only fire when the value actually changes. Shapes live
// in a keyed sub-store with batched notification.

mod shapes;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;

pub use shapes::{ShapeCollection, ShapeSnapshot, ShapesListener};

use crate::connection::ConnectionSnapshot;
use crate::listener::{ListenerSet, Subscription};
use crate::model::{
    CommandOutcome, ContextTopology, DisplayOptions, EchoLine, EntitySet, Route, ServerStatus,
    ShapeDisplayOptions, SimTick,
};

/// Console lines kept in the echo log.
pub const ECHO_LOG_CAPACITY: usize = 200;

pub type CommandCatalog = BTreeMap<String, Value>;

// ── Field ────────────────────────────────────────────────────────────

type FieldListener<T> = dyn Fn(&T, &T) + Send + Sync;

/// One observable value.
pub struct Field<T: Send + Sync + 'static> {
    name: &'static str,
    value: Mutex<T>,
    listeners: ListenerSet<FieldListener<T>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Field<T> {
    fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            value: Mutex::new(value),
            listeners: ListenerSet::new(),
        }
    }

    pub fn get(&self) -> T {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Register a `(new, old)` listener. Not invoked until the next change.
    pub fn subscribe(&self, listener: impl Fn(&T, &T) + Send + Sync + 'static) -> Subscription {
        self.listeners.add(Arc::new(listener))
    }

    /// Store `value`; notify and return `true` only if it differs.
    fn set(&self, value: T) -> bool {
        let old = {
            let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == value {
                return false;
            }
            std::mem::replace(&mut *current, value.clone())
        };
        debug!(field = self.name, "store field changed");
        self.listeners.notify(self.name, |l| l(&value, &old));
        true
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + Send + Sync + 'static> std::fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple(self.name).field(&self.get()).finish()
    }
}

// ── AppSnapshot ──────────────────────────────────────────────────────

/// Point-in-time copy of the whole store.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSnapshot {
    pub transport_connected: bool,
    pub sim_connected: bool,
    pub receiving_data: bool,
    pub sim_info: Option<SimTick>,
    pub entity_batch: Option<Arc<EntitySet>>,
    pub selected_entity_id: Option<String>,
    pub route: Option<Arc<Route>>,
    pub active_context_id: Option<String>,
    pub contexts: ContextTopology,
    pub shape_display_options: ShapeDisplayOptions,
    pub server_status: ServerStatus,
    pub command_catalog: Option<Arc<CommandCatalog>>,
    pub display_options: DisplayOptions,
    pub echo_log: Arc<Vec<EchoLine>>,
    pub last_command_result: Option<CommandOutcome>,
    pub shapes: ShapeSnapshot,
}

// ── AppStore ─────────────────────────────────────────────────────────

/// Observable application state.
///
/// Fields are public for reading and subscribing; writes go through the
/// setters so that cross-field rules (context switch, reset) always apply.
#[derive(Debug)]
pub struct AppStore {
    // Mirrors of the connection tracker, for consumers that only watch the store.
    pub transport_connected: Field<bool>,
    pub sim_connected: Field<bool>,
    pub receiving_data: Field<bool>,

    pub sim_info: Field<Option<SimTick>>,
    pub entity_batch: Field<Option<Arc<EntitySet>>>,
    pub selected_entity_id: Field<Option<String>>,
    /// Route of one aircraft in the active context, usually the selected one.
    pub route: Field<Option<Arc<Route>>>,
    pub active_context_id: Field<Option<String>>,
    pub contexts: Field<ContextTopology>,
    pub shape_display_options: Field<ShapeDisplayOptions>,
    pub server_status: Field<ServerStatus>,
    pub command_catalog: Field<Option<Arc<CommandCatalog>>>,
    pub display_options: Field<DisplayOptions>,
    pub echo_log: Field<Arc<Vec<EchoLine>>>,
    pub last_command_result: Field<Option<CommandOutcome>>,

    pub shapes: ShapeCollection,
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStore {
    pub fn new() -> Self {
        Self {
            transport_connected: Field::new("transport_connected", false),
            sim_connected: Field::new("sim_connected", false),
            receiving_data: Field::new("receiving_data", false),
            sim_info: Field::new("sim_info", None),
            entity_batch: Field::new("entity_batch", None),
            selected_entity_id: Field::new("selected_entity_id", None),
            route: Field::new("route", None),
            active_context_id: Field::new("active_context_id", None),
            contexts: Field::new("contexts", ContextTopology::default()),
            shape_display_options: Field::new(
                "shape_display_options",
                ShapeDisplayOptions::default(),
            ),
            server_status: Field::new("server_status", ServerStatus::default()),
            command_catalog: Field::new("command_catalog", None),
            display_options: Field::new("display_options", DisplayOptions::default()),
            echo_log: Field::new("echo_log", Arc::new(Vec::new())),
            last_command_result: Field::new("last_command_result", None),
            shapes: ShapeCollection::new(),
        }
    }

    pub fn snapshot(&self) -> AppSnapshot {
        AppSnapshot {
            transport_connected: self.transport_connected.get(),
            sim_connected: self.sim_connected.get(),
            receiving_data: self.receiving_data.get(),
            sim_info: self.sim_info.get(),
            entity_batch: self.entity_batch.get(),
            selected_entity_id: self.selected_entity_id.get(),
            route: self.route.get(),
            active_context_id: self.active_context_id.get(),
            contexts: self.contexts.get(),
            shape_display_options: self.shape_display_options.get(),
            server_status: self.server_status.get(),
            command_catalog: self.command_catalog.get(),
            display_options: self.display_options.get(),
            echo_log: self.echo_log.get(),
            last_command_result: self.last_command_result.get(),
            shapes: self.shapes.snapshot(),
        }
    }

    // ── Context switching ────────────────────────────────────────────

    /// Change the active simulation context.
    ///
    /// Switching away from a known context clears every shape (one shape
    /// notification) and the route. The first assignment after startup
    /// keeps shapes. Setting the current value again does nothing.
    pub fn set_active_context(&self, id: Option<String>) -> bool {
        let previous = self.active_context_id.get();
        if previous == id {
            return false;
        }
        if previous.is_some() {
            let cleared = self.shapes.clear_all();
            self.route.set(None);
            debug!(from = ?previous, to = ?id, cleared, "active context switched");
        }
        self.active_context_id.set(id)
    }

    // ── Session reset ────────────────────────────────────────────────

    /// Reset simulation-scoped state.
    ///
    /// Connection flags, server status, display preferences, the command
    /// catalogue, the context topology and the echo log survive. Tick,
    /// traffic, selection, the route, the active context and all shapes
    /// are cleared.
    pub fn reset(&self) {
        self.sim_info.set(None);
        self.entity_batch.set(None);
        self.selected_entity_id.set(None);
        self.route.set(None);
        self.active_context_id.set(None);
        let cleared = self.shapes.clear_all();
        debug!(cleared_shapes = cleared, "store reset");
    }

    // ── Setters ──────────────────────────────────────────────────────

    /// Copy the tracker's connection flags into the mirror fields.
    pub fn mirror_connection(&self, snap: &ConnectionSnapshot) {
        self.transport_connected.set(snap.transport_connected);
        self.sim_connected.set(snap.sim_connected);
        self.receiving_data.set(snap.receiving_data);
    }

    pub fn set_sim_info(&self, tick: Option<SimTick>) -> bool {
        self.sim_info.set(tick)
    }

    pub fn set_entity_batch(&self, batch: Option<EntitySet>) -> bool {
        self.entity_batch.set(batch.map(Arc::new))
    }

    /// Select an aircraft. A route held for a different aircraft is
    /// dropped.
    pub fn set_selected_entity(&self, id: Option<String>) -> bool {
        let stale = self
            .route
            .get()
            .is_some_and(|r| id.as_deref() != Some(r.aircraft_id.as_str()));
        if stale {
            self.route.set(None);
        }
        self.selected_entity_id.set(id)
    }

    pub fn set_route(&self, route: Option<Route>) -> bool {
        self.route.set(route.map(Arc::new))
    }

    pub fn set_contexts(&self, topology: ContextTopology) -> bool {
        self.contexts.set(topology)
    }

    pub fn set_shape_display_options(&self, options: ShapeDisplayOptions) -> bool {
        self.shape_display_options.set(options)
    }

    pub fn set_server_status(&self, status: ServerStatus) -> bool {
        self.server_status.set(status)
    }

    pub fn set_command_catalog(&self, catalog: Option<CommandCatalog>) -> bool {
        self.command_catalog.set(catalog.map(Arc::new))
    }

    pub fn set_display_options(&self, options: DisplayOptions) -> bool {
        self.display_options.set(options)
    }

    /// Append a console line, keeping the last [`ECHO_LOG_CAPACITY`].
    pub fn push_echo(&self, line: EchoLine) {
        let current = self.echo_log.get();
        let skip = (current.len() + 1).saturating_sub(ECHO_LOG_CAPACITY);
        let mut next: Vec<EchoLine> = current.iter().skip(skip).cloned().collect();
        next.push(line);
        self.echo_log.set(Arc::new(next));
    }

    pub fn clear_echo(&self) -> bool {
        self.echo_log.set(Arc::new(Vec::new()))
    }

    pub fn set_command_result(&self, outcome: CommandOutcome) -> bool {
        self.last_command_result.set(Some(outcome))
    }
}

// ── Tests ────────────────────────────────────────────────────────────
